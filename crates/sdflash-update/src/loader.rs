//! Bootloader client interface
//!
//! The wire protocol (framing, sync, command encoding) lives behind this
//! trait. The session only sequences the calls.

use std::time::Duration;

use crate::checksum::Md5Digest;
use crate::error::LoaderError;

/// Client for the target's serial bootloader
#[async_trait::async_trait]
pub trait BootloaderClient: Send {
    /// Sync with the bootloader, giving up after `timeout`
    async fn connect(&mut self, timeout: Duration) -> Result<(), LoaderError>;

    /// Switch the link to a new rate
    async fn set_rate(&mut self, baud: u32) -> Result<(), LoaderError>;

    /// Open a flash write session of `total_size` bytes at `address`
    async fn begin_write(
        &mut self,
        address: u32,
        total_size: u32,
        chunk_size: u32,
    ) -> Result<(), LoaderError>;

    /// Write the next chunk of the open session
    async fn write_chunk(&mut self, data: &[u8]) -> Result<(), LoaderError>;

    /// Ask the target to digest `size` bytes at `address` and compare
    async fn verify_checksum(
        &mut self,
        address: u32,
        size: u32,
        expected: &Md5Digest,
    ) -> Result<(), LoaderError>;

    /// Erase the whole flash chip
    async fn erase_chip(&mut self) -> Result<(), LoaderError>;

    /// Leave the bootloader and reset the target
    async fn reset_target(&mut self) -> Result<(), LoaderError>;
}
