//! File operations.

use super::{flag, with_path};
use crate::client::Invoker;
use arbor_core::{ClientResult, Verb};
use arbor_options::CallOptions;
use async_trait::async_trait;
use bytes::Bytes;

/// Options for [`FileClient::write_file`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteFileOptions {
    /// Append to the existing content instead of replacing it
    pub append: bool,
    /// Option groups
    pub call: CallOptions,
}

/// Options for [`FileClient::read_file`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReadFileOptions {
    /// First byte to read
    pub offset: Option<u64>,
    /// Number of bytes to read
    pub length: Option<u64>,
    /// Option groups
    pub call: CallOptions,
}

/// File content operations
#[async_trait]
pub trait FileClient: Invoker {
    /// Write `data` to the file at `path`
    async fn write_file(
        &self,
        path: &str,
        data: Bytes,
        options: WriteFileOptions,
    ) -> ClientResult<()> {
        let mut params = with_path(path)?;
        flag(&mut params, "append", options.append)?;
        self.invoke(Verb::WriteFile, params, options.call, Some(data))
            .await?;
        Ok(())
    }

    /// Read the file at `path`
    async fn read_file(&self, path: &str, options: ReadFileOptions) -> ClientResult<Bytes> {
        let mut params = with_path(path)?;
        if let Some(offset) = options.offset {
            params.insert("offset", offset)?;
        }
        if let Some(length) = options.length {
            params.insert("length", length)?;
        }
        let response = self
            .invoke(Verb::ReadFile, params, options.call, None)
            .await?;
        Ok(response.body.unwrap_or_default())
    }
}
