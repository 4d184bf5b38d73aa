//! Test doubles shared by the integration suites

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use sdflash_update::prelude::*;

/// Everything the doubles observed, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Output(ControlLineId),
    Line(ControlLineId, Level, Instant),
    Connect(Duration),
    SetRate(u32),
    BeginWrite { address: u32, total: u32, chunk: u32 },
    Chunk(usize),
    Verify { address: u32, size: u32 },
    Erase,
    Reset,
}

pub type EventLog = Arc<Mutex<Vec<Event>>>;
pub type FlashMap = Arc<Mutex<BTreeMap<u32, Vec<u8>>>>;

/// Failure injection for [`MockClient`]
#[derive(Debug, Clone, Default)]
pub struct ClientBehavior {
    pub fail_connect: bool,
    pub hang_connect: bool,
    pub fail_set_rate: bool,
    pub fail_chunk_at: Option<usize>,
    pub corrupt_writes: bool,
    pub fail_erase: bool,
    pub fail_reset: bool,
    pub chunk_delay: Option<Duration>,
}

/// Bootloader double that keeps written flash and digests it on verify
pub struct MockClient {
    log: EventLog,
    flash: FlashMap,
    behavior: ClientBehavior,
    open_address: Option<u32>,
    chunks: usize,
}

impl MockClient {
    pub fn new(log: EventLog, flash: FlashMap, behavior: ClientBehavior) -> Self {
        Self {
            log,
            flash,
            behavior,
            open_address: None,
            chunks: 0,
        }
    }
}

#[async_trait]
impl BootloaderClient for MockClient {
    async fn connect(&mut self, timeout: Duration) -> Result<(), LoaderError> {
        self.log.lock().push(Event::Connect(timeout));
        if self.behavior.hang_connect {
            std::future::pending::<()>().await;
        }
        if self.behavior.fail_connect {
            return Err(LoaderError::Timeout);
        }
        Ok(())
    }

    async fn set_rate(&mut self, baud: u32) -> Result<(), LoaderError> {
        self.log.lock().push(Event::SetRate(baud));
        if self.behavior.fail_set_rate {
            return Err(LoaderError::Rejected("baud change refused".into()));
        }
        Ok(())
    }

    async fn begin_write(
        &mut self,
        address: u32,
        total_size: u32,
        chunk_size: u32,
    ) -> Result<(), LoaderError> {
        self.log.lock().push(Event::BeginWrite {
            address,
            total: total_size,
            chunk: chunk_size,
        });
        self.flash.lock().insert(address, Vec::new());
        self.open_address = Some(address);
        Ok(())
    }

    async fn write_chunk(&mut self, data: &[u8]) -> Result<(), LoaderError> {
        if let Some(delay) = self.behavior.chunk_delay {
            tokio::time::sleep(delay).await;
        }
        let index = self.chunks;
        self.chunks += 1;
        if self.behavior.fail_chunk_at == Some(index) {
            return Err(LoaderError::Rejected("flash write error".into()));
        }
        let address = self
            .open_address
            .ok_or_else(|| LoaderError::Rejected("no write session".into()))?;

        self.log.lock().push(Event::Chunk(data.len()));
        let mut flash = self.flash.lock();
        let region = flash.entry(address).or_default();
        let start = region.len();
        region.extend_from_slice(data);
        if self.behavior.corrupt_writes && start == 0 {
            if let Some(first) = region.first_mut() {
                *first ^= 0xFF;
            }
        }
        Ok(())
    }

    async fn verify_checksum(
        &mut self,
        address: u32,
        size: u32,
        expected: &Md5Digest,
    ) -> Result<(), LoaderError> {
        self.log.lock().push(Event::Verify { address, size });
        let flash = self.flash.lock();
        let region = flash.get(&address).map(Vec::as_slice).unwrap_or_default();
        let written = region.get(..size as usize).unwrap_or(region);
        let actual = Md5Digest::compute(written);
        if actual == *expected {
            Ok(())
        } else {
            Err(LoaderError::DigestMismatch {
                actual: actual.to_hex(),
            })
        }
    }

    async fn erase_chip(&mut self) -> Result<(), LoaderError> {
        self.log.lock().push(Event::Erase);
        if self.behavior.fail_erase {
            return Err(LoaderError::Rejected("erase refused".into()));
        }
        self.flash.lock().clear();
        Ok(())
    }

    async fn reset_target(&mut self) -> Result<(), LoaderError> {
        self.log.lock().push(Event::Reset);
        if self.behavior.fail_reset {
            return Err(LoaderError::Link("port closed".into()));
        }
        Ok(())
    }
}

/// Control line double recording every level change with its time
pub struct MockLine {
    id: ControlLineId,
    log: EventLog,
    fail: bool,
}

impl MockLine {
    pub fn new(id: ControlLineId, log: EventLog) -> Self {
        Self {
            id,
            log,
            fail: false,
        }
    }

    pub fn failing(id: ControlLineId, log: EventLog) -> Self {
        Self {
            id,
            log,
            fail: true,
        }
    }
}

impl ControlLine for MockLine {
    fn set_output(&mut self) -> Result<(), GpioError> {
        if self.fail {
            return Err(GpioError::new("pin not available"));
        }
        self.log.lock().push(Event::Output(self.id));
        Ok(())
    }

    fn set_level(&mut self, level: Level) -> Result<(), GpioError> {
        if self.fail {
            return Err(GpioError::new("pin not available"));
        }
        self.log.lock().push(Event::Line(self.id, level, Instant::now()));
        Ok(())
    }
}

/// Display double keeping every banner
#[derive(Debug, Default)]
pub struct RecordingDisplay {
    shown: Mutex<Vec<(String, String)>>,
}

impl RecordingDisplay {
    pub fn banners(&self) -> Vec<(String, String)> {
        self.shown.lock().clone()
    }

    pub fn titles(&self) -> Vec<String> {
        self.shown.lock().iter().map(|(t, _)| t.clone()).collect()
    }

    pub fn progress_messages(&self) -> Vec<String> {
        self.shown
            .lock()
            .iter()
            .filter(|(_, m)| m.starts_with("Progress: "))
            .map(|(_, m)| m.clone())
            .collect()
    }
}

impl StatusDisplay for RecordingDisplay {
    fn show(&self, title: &str, message: &str) {
        self.shown.lock().push((title.to_string(), message.to_string()));
    }
}

/// Storage that hands out at most `step` bytes per read and can claim a
/// larger size than it holds
pub struct TrickleStorage {
    files: HashMap<String, Vec<u8>>,
    step: usize,
    declared_extra: u64,
}

impl TrickleStorage {
    pub fn new(step: usize) -> Self {
        Self {
            files: HashMap::new(),
            step: step.max(1),
            declared_extra: 0,
        }
    }

    pub fn with_file(mut self, path: &str, data: Vec<u8>) -> Self {
        self.files.insert(path.to_string(), data);
        self
    }

    pub fn truncated_by(mut self, extra: u64) -> Self {
        self.declared_extra = extra;
        self
    }
}

struct TrickleReader {
    data: Vec<u8>,
    position: usize,
    step: usize,
    size: u64,
}

#[async_trait]
impl ImageReader for TrickleReader {
    fn size(&self) -> u64 {
        self.size
    }

    async fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let remaining = self.data.get(self.position..).unwrap_or_default();
        let n = remaining.len().min(buf.len()).min(self.step);
        if let (Some(dst), Some(src)) = (buf.get_mut(..n), remaining.get(..n)) {
            dst.copy_from_slice(src);
        }
        self.position += n;
        Ok(n)
    }
}

#[async_trait]
impl FirmwareStorage for TrickleStorage {
    async fn open(&self, path: &str) -> Result<Box<dyn ImageReader>, StorageError> {
        let data = self
            .files
            .get(path)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(path.to_string()))?;
        let size = data.len() as u64 + self.declared_extra;
        Ok(Box::new(TrickleReader {
            data,
            position: 0,
            step: self.step,
            size,
        }))
    }

    async fn release(&self) -> Result<(), StorageError> {
        Ok(())
    }

    fn is_available(&self) -> bool {
        true
    }
}

/// Deterministic image contents
pub fn image(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
        .collect()
}

/// Manifest JSON for one record with all three segments
pub fn three_segment_manifest(fw_id: &str, boot: &[u8], part: &[u8], app: &[u8]) -> String {
    serde_json::json!([{
        "fw_id": fw_id,
        "device_type": "ESP32-S3-DevKit",
        "version": "1.0.2",
        "path": "/fw/app.bin",
        "md5": Md5Digest::compute(app).to_hex(),
        "path_bootloader": "/fw/bootloader.bin",
        "md5_bootloader": Md5Digest::compute(boot).to_hex(),
        "path_partition": "/fw/partitions.bin",
        "md5_partition": Md5Digest::compute(part).to_hex(),
    }])
    .to_string()
}

/// Handles a test keeps after the session takes ownership of the doubles
pub struct Recorder {
    pub log: EventLog,
    pub flash: FlashMap,
    pub display: Arc<RecordingDisplay>,
    pub storage: Arc<MemoryStorage>,
    pub catalog: Arc<CatalogStore>,
}

impl Recorder {
    pub fn events(&self) -> Vec<Event> {
        self.log.lock().clone()
    }

    pub fn begin_write_addresses(&self) -> Vec<u32> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::BeginWrite { address, .. } => Some(address),
                _ => None,
            })
            .collect()
    }

    pub fn line_changes(&self) -> Vec<(ControlLineId, Level, Instant)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Line(id, level, at) => Some((id, level, at)),
                _ => None,
            })
            .collect()
    }

    pub fn flashed(&self, address: u32) -> Option<Vec<u8>> {
        self.flash.lock().get(&address).cloned()
    }

    pub fn count(&self, wanted: impl Fn(&Event) -> bool) -> usize {
        self.events().iter().filter(|e| wanted(e)).count()
    }
}

/// Assembles a session over the doubles
pub struct Bench {
    pub config: FlasherConfig,
    pub behavior: ClientBehavior,
    pub manifest: String,
    pub files: Vec<(String, Vec<u8>)>,
    pub faulty_line: Option<ControlLineId>,
}

impl Bench {
    pub fn new(manifest: impl Into<String>) -> Self {
        Self {
            config: FlasherConfig::default(),
            behavior: ClientBehavior::default(),
            manifest: manifest.into(),
            files: Vec::new(),
            faulty_line: None,
        }
    }

    pub fn file(mut self, path: &str, data: Vec<u8>) -> Self {
        self.files.push((path.to_string(), data));
        self
    }

    pub fn behavior(mut self, behavior: ClientBehavior) -> Self {
        self.behavior = behavior;
        self
    }

    pub fn config(mut self, config: FlasherConfig) -> Self {
        self.config = config;
        self
    }

    pub fn faulty_line(mut self, line: ControlLineId) -> Self {
        self.faulty_line = Some(line);
        self
    }

    pub fn build(self) -> anyhow::Result<(FlashSession, Recorder)> {
        let log = EventLog::default();
        let flash = FlashMap::default();
        let display = Arc::new(RecordingDisplay::default());

        let manifest = self.manifest.into_bytes();
        let catalog = Arc::new(CatalogStore::new(Catalog::load(&manifest)?));
        let storage = Arc::new(MemoryStorage::new());
        storage.insert(self.config.manifest_path.clone(), manifest);
        for (path, data) in self.files {
            storage.insert(path, data);
        }

        let line = |id: ControlLineId| -> Box<dyn ControlLine> {
            if self.faulty_line == Some(id) {
                Box::new(MockLine::failing(id, Arc::clone(&log)))
            } else {
                Box::new(MockLine::new(id, Arc::clone(&log)))
            }
        };
        let reset = TargetResetController::new(
            line(ControlLineId::ModeSelect),
            line(ControlLineId::Reset),
            self.config.reset.clone(),
        );
        let client = MockClient::new(Arc::clone(&log), Arc::clone(&flash), self.behavior);

        let session = FlashSession::new(
            self.config,
            Arc::clone(&catalog),
            Arc::clone(&storage) as Arc<dyn FirmwareStorage>,
            Box::new(client),
            reset,
            Arc::clone(&display) as Arc<dyn StatusDisplay>,
        );
        let recorder = Recorder {
            log,
            flash,
            display,
            storage,
            catalog,
        };
        Ok((session, recorder))
    }
}
