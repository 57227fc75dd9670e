//! Handler persisting entries in the binary stream format.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ckmon::{LogEntry, Writer, format::FILE_EXTENSION};
use common::DateTimeStamp;

use crate::config::HandlerConfig;
use crate::handler::{Handler, HandlerResult, SinkContext};

/// Configuration of the [`BinaryFileHandler`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryFileHandlerConfig {
    /// Directory receiving the stream files; created if missing.
    pub directory: PathBuf,
    /// Compress streams with gzip.
    pub use_gzip_compression: bool,
    /// Prefix of generated file names.
    pub file_name_prefix: String,
}

impl BinaryFileHandlerConfig {
    pub const TYPE_NAME: &'static str = "BinaryFile";
}

impl HandlerConfig for BinaryFileHandlerConfig {
    fn type_name(&self) -> &'static str {
        Self::TYPE_NAME
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn clone_box(&self) -> Box<dyn HandlerConfig> {
        Box::new(self.clone())
    }
}

/// Writes every entry it receives into one `.ckmon` file, opened at
/// activation and terminated at deactivation. The periodic tick flushes so
/// a crash loses at most one timer period of entries.
pub struct BinaryFileHandler {
    config: BinaryFileHandlerConfig,
    writer: Option<Writer>,
    path: Option<PathBuf>,
}

impl BinaryFileHandler {
    pub fn new(config: BinaryFileHandlerConfig) -> Self {
        Self {
            config,
            writer: None,
            path: None,
        }
    }

    /// Path of the stream file this instance writes, once activated.
    pub fn path(&self) -> Option<&PathBuf> {
        self.path.as_ref()
    }

    fn open_writer(&mut self, ctx: &SinkContext) -> HandlerResult<()> {
        std::fs::create_dir_all(&self.config.directory)?;
        let file_name = format!(
            "{}-{}-{}.{}",
            self.config.file_name_prefix,
            ctx.grand_output_id(),
            DateTimeStamp::now().ticks,
            FILE_EXTENSION
        );
        let path = self.config.directory.join(file_name);
        let writer = if self.config.use_gzip_compression {
            Writer::create_compressed(&path)?
        } else {
            Writer::create(&path)?
        };
        self.writer = Some(writer);
        self.path = Some(path);
        Ok(())
    }
}

#[async_trait]
impl Handler for BinaryFileHandler {
    async fn activate(&mut self, ctx: &SinkContext) -> HandlerResult<bool> {
        self.open_writer(ctx)?;
        Ok(true)
    }

    async fn handle(&mut self, _ctx: &SinkContext, entry: &Arc<LogEntry>) -> HandlerResult<()> {
        if let Some(writer) = self.writer.as_mut() {
            writer.write(entry)?;
        }
        Ok(())
    }

    async fn on_timer(&mut self, _ctx: &SinkContext, _elapsed: Duration) -> HandlerResult<()> {
        if let Some(writer) = self.writer.as_mut() {
            writer.flush()?;
        }
        Ok(())
    }

    async fn apply_configuration(
        &mut self,
        _ctx: &SinkContext,
        config: &dyn HandlerConfig,
    ) -> bool {
        let Some(config) = config.as_any().downcast_ref::<BinaryFileHandlerConfig>() else {
            return false;
        };
        // The open file is bound to directory and compression; a change
        // there needs a fresh instance.
        if config.directory != self.config.directory
            || config.use_gzip_compression != self.config.use_gzip_compression
        {
            return false;
        }
        self.config = config.clone();
        true
    }

    async fn deactivate(&mut self, _ctx: &SinkContext) {
        if let Some(writer) = self.writer.take() {
            if let Err(e) = writer.close() {
                tracing::warn!(error = %e, "failed to terminate a stream file");
            }
        }
    }
}
