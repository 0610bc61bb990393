use log::warn;
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufReader, BufWriter, ErrorKind, Read, Write},
    path::Path,
};
use zstd::{Encoder, stream::read::Decoder};

// follow the layout of the binary records written by the tracer:
// struct { uint64_t instruction_pointer; uint64_t virtual_address; bool is_write; }
// little endian, padded to 24 bytes

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, Hash, PartialEq, Eq)]
pub struct TraceRecord {
    pub instruction_pointer: u64,
    pub virtual_address: u64,
    pub is_write: bool,
}

pub const RECORD_SIZE: usize = std::mem::size_of::<TraceRecord>();

impl TraceRecord {
    pub fn from_bytes(bytes: &[u8; RECORD_SIZE]) -> Self {
        let mut tmp_u64 = [0u8; 8];
        tmp_u64.copy_from_slice(&bytes[0..8]);
        let instruction_pointer = u64::from_le_bytes(tmp_u64);
        tmp_u64.copy_from_slice(&bytes[8..16]);
        let virtual_address = u64::from_le_bytes(tmp_u64);
        Self {
            instruction_pointer,
            virtual_address,
            is_write: bytes[16] != 0,
        }
    }

    pub fn to_bytes(&self) -> [u8; RECORD_SIZE] {
        let mut bytes = [0u8; RECORD_SIZE];
        bytes[0..8].copy_from_slice(&self.instruction_pointer.to_le_bytes());
        bytes[8..16].copy_from_slice(&self.virtual_address.to_le_bytes());
        bytes[16] = self.is_write as u8;
        bytes
    }
}

fn is_zstd<P: AsRef<Path>>(path: P) -> bool {
    path.as_ref()
        .extension()
        .is_some_and(|extension| extension == "zst")
}

pub struct TraceReader<R: Read> {
    reader: R,
    records: u64,
    buf: [u8; RECORD_SIZE],
}

impl TraceReader<Box<dyn Read>> {
    /// Open a trace file, zstd compressed if the name ends with `.zst`
    pub fn open<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let file = File::open(&path)?;
        let reader: Box<dyn Read> = if is_zstd(&path) {
            Box::new(Decoder::new(file)?)
        } else {
            Box::new(BufReader::new(file))
        };
        Ok(Self::new(reader))
    }
}

impl<R: Read> TraceReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            records: 0,
            buf: [0u8; RECORD_SIZE],
        }
    }

    /// Number of records returned so far
    pub fn records(&self) -> u64 {
        self.records
    }

    /// `None` at end of trace. A truncated trailing record ends the trace.
    pub fn next_record(&mut self) -> anyhow::Result<Option<TraceRecord>> {
        let mut filled = 0;
        while filled < RECORD_SIZE {
            match self.reader.read(&mut self.buf[filled..]) {
                Ok(0) => break,
                Ok(size) => filled += size,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            }
        }

        if filled == 0 {
            return Ok(None);
        }
        if filled < RECORD_SIZE {
            warn!(
                "Ignore truncated trace record of {} bytes after {} records",
                filled, self.records
            );
            return Ok(None);
        }

        self.records += 1;
        Ok(Some(TraceRecord::from_bytes(&self.buf)))
    }
}

impl<R: Read> Iterator for TraceReader<R> {
    type Item = anyhow::Result<TraceRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record().transpose()
    }
}

enum TraceSink {
    Plain(BufWriter<File>),
    Zstd(Encoder<'static, BufWriter<File>>),
}

pub struct TraceWriter {
    sink: TraceSink,
    records: u64,
}

impl TraceWriter {
    /// Create a trace file, zstd compressed if the name ends with `.zst`
    pub fn create<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let writer = BufWriter::new(File::create(&path)?);
        let sink = if is_zstd(&path) {
            TraceSink::Zstd(Encoder::new(writer, 0)?)
        } else {
            TraceSink::Plain(writer)
        };
        Ok(Self { sink, records: 0 })
    }

    pub fn record(&mut self, record: &TraceRecord) -> anyhow::Result<()> {
        let bytes = record.to_bytes();
        match &mut self.sink {
            TraceSink::Plain(writer) => writer.write_all(&bytes)?,
            TraceSink::Zstd(encoder) => encoder.write_all(&bytes)?,
        }
        self.records += 1;
        Ok(())
    }

    pub fn records(&self) -> u64 {
        self.records
    }

    pub fn finish(self) -> anyhow::Result<u64> {
        let mut writer = match self.sink {
            TraceSink::Plain(writer) => writer,
            TraceSink::Zstd(encoder) => encoder.finish()?,
        };
        writer.flush()?;
        Ok(self.records)
    }
}
