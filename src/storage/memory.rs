//! In-memory storage implementation.
//!
//! Used by tests and by engines that never persist. Files are byte buffers
//! in a shared map; outputs publish their buffer on `close`.

use std::collections::HashMap;
use std::io::{self, Cursor, Read, Write};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{Result, SagittaError};
use crate::storage::{Storage, StorageInput, StorageOutput};

type FileMap = Arc<RwLock<HashMap<String, Arc<Vec<u8>>>>>;

/// A memory-based storage implementation.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    files: FileMap,
}

impl MemoryStorage {
    /// Create a new empty memory storage.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemoryStorage {
    fn open_input(&self, name: &str) -> Result<Box<dyn StorageInput>> {
        let files = self.files.read();
        let data = files
            .get(name)
            .cloned()
            .ok_or_else(|| SagittaError::storage(format!("File not found: {name}")))?;
        Ok(Box::new(MemoryInput {
            cursor: Cursor::new(data.to_vec()),
        }))
    }

    fn create_output(&self, name: &str) -> Result<Box<dyn StorageOutput>> {
        Ok(Box::new(MemoryOutput {
            name: name.to_string(),
            buffer: Vec::new(),
            files: self.files.clone(),
            closed: false,
        }))
    }

    fn file_exists(&self, name: &str) -> bool {
        self.files.read().contains_key(name)
    }

    fn delete_file(&self, name: &str) -> Result<()> {
        self.files
            .write()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| SagittaError::storage(format!("File not found: {name}")))
    }

    fn list_files(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.files.read().keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    fn rename_file(&self, old_name: &str, new_name: &str) -> Result<()> {
        let mut files = self.files.write();
        let data = files
            .remove(old_name)
            .ok_or_else(|| SagittaError::storage(format!("File not found: {old_name}")))?;
        files.insert(new_name.to_string(), data);
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug)]
struct MemoryInput {
    cursor: Cursor<Vec<u8>>,
}

impl Read for MemoryInput {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.cursor.read(buf)
    }
}

impl StorageInput for MemoryInput {
    fn size(&self) -> Result<u64> {
        Ok(self.cursor.get_ref().len() as u64)
    }
}

#[derive(Debug)]
struct MemoryOutput {
    name: String,
    buffer: Vec<u8>,
    files: FileMap,
    closed: bool,
}

impl Write for MemoryOutput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl StorageOutput for MemoryOutput {
    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let data = Arc::new(std::mem::take(&mut self.buffer));
        self.files.write().insert(self.name.clone(), data);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_then_read_round_trip() {
        let storage = MemoryStorage::new();

        let mut output = storage.create_output("greeting.txt").unwrap();
        output.write_all(b"hello").unwrap();
        output.close().unwrap();

        assert!(storage.file_exists("greeting.txt"));

        let mut input = storage.open_input("greeting.txt").unwrap();
        let mut contents = Vec::new();
        input.read_to_end(&mut contents).unwrap();
        assert_eq!(contents, b"hello");
        assert_eq!(input.size().unwrap(), 5);
    }

    #[test]
    fn test_unclosed_output_is_invisible() {
        let storage = MemoryStorage::new();
        let mut output = storage.create_output("pending.bin").unwrap();
        output.write_all(b"data").unwrap();

        assert!(!storage.file_exists("pending.bin"));
    }

    #[test]
    fn test_rename_replaces_target() {
        let storage = MemoryStorage::new();
        for (name, data) in [("a.tmp", b"new".as_slice()), ("a.bin", b"old".as_slice())] {
            let mut output = storage.create_output(name).unwrap();
            output.write_all(data).unwrap();
            output.close().unwrap();
        }

        storage.rename_file("a.tmp", "a.bin").unwrap();
        assert!(!storage.file_exists("a.tmp"));

        let mut input = storage.open_input("a.bin").unwrap();
        let mut contents = Vec::new();
        input.read_to_end(&mut contents).unwrap();
        assert_eq!(contents, b"new");
    }

    #[test]
    fn test_delete_missing_file_is_error() {
        let storage = MemoryStorage::new();
        assert!(storage.delete_file("missing").is_err());
    }
}
