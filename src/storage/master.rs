//! Master-delegated back-end.
//!
//! Every storage operation becomes one line-oriented RPC command to the
//! master peer. Requests are `<id> <COMMAND> key=value ...`; replies
//! are `<id> <completed> <errorCode> [key=value ...]`, where
//! intermediate replies carry `completed` 0. Binary payloads travel
//! base64-encoded; values with spaces are single-quoted. Bandwidth
//! limiting and pre/post-processing still run locally.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use tracing::trace;

use crate::error::{self, Error, Result};

use super::{
    BackendFile, BackendFileOps, BackendOps, CreateDisposition, DirectoryList, FileInfo,
    StorageOptions, StorageSpecifier,
};

/// Raw payload bytes per `STORAGE_WRITE`/`STORAGE_READ` command.
const MAX_RPC_DATA: usize = 8 * 1024;

/// Line transport to the master peer.
pub trait MasterTransport: Send {
    fn send_line(&mut self, line: &str) -> Result<()>;
    /// Next reply line; `None` when nothing arrived within `timeout`.
    fn recv_line(&mut self, timeout: Duration) -> Result<Option<String>>;
}

pub trait MasterTransportFactory: Send + Sync {
    fn connect(&self) -> Result<Box<dyn MasterTransport>>;
}

pub(crate) struct Response {
    pub fields: HashMap<String, String>,
}

impl Response {
    fn field(&self, name: &str) -> Result<&str> {
        self.fields
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| Error::Protocol {
                reason: format!("missing field '{name}'"),
            })
    }
}

/// Serialized command channel with request-id matching.
pub(crate) struct ServerIo {
    transport: Mutex<Box<dyn MasterTransport>>,
    next_id: AtomicU64,
    timeout: Duration,
}

impl ServerIo {
    fn new(transport: Box<dyn MasterTransport>, timeout: Duration) -> Self {
        ServerIo {
            transport: Mutex::new(transport),
            next_id: AtomicU64::new(1),
            timeout,
        }
    }

    /// Send one command and wait for its completed reply.
    pub(crate) fn execute(&self, command: &str, args: &[(&str, &str)]) -> Result<Response> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut line = format!("{id} {command}");
        for (key, value) in args {
            line.push(' ');
            line.push_str(key);
            line.push('=');
            line.push_str(&quote(value));
        }

        let mut transport = self.transport.lock().unwrap();
        trace!(message = "Master command.", line = %line);
        transport.send_line(&line)?;

        let deadline = Instant::now() + self.timeout;
        loop {
            let now = Instant::now();
            if now >= deadline {
                return error::RpcTimeoutSnafu { id }.fail();
            }
            let Some(reply) = transport.recv_line(deadline - now)? else {
                return error::RpcTimeoutSnafu { id }.fail();
            };
            trace!(message = "Master reply.", line = %reply);

            let (reply_id, completed, code, fields) = parse_reply(&reply)?;
            if reply_id != id {
                // A stale reply from an abandoned request.
                continue;
            }
            if completed == 0 {
                continue;
            }
            if code != 0 {
                let text = fields.get("error").cloned().unwrap_or_default();
                return error::RpcFailedSnafu { code, text }.fail();
            }
            return Ok(Response { fields });
        }
    }
}

fn parse_reply(line: &str) -> Result<(u64, u32, u32, HashMap<String, String>)> {
    let malformed = |reason: &str| Error::Protocol {
        reason: format!("{reason}: '{line}'"),
    };

    let mut rest = line.trim_start();
    let mut take_word = |rest: &mut &str| -> Option<String> {
        let text = rest.trim_start();
        if text.is_empty() {
            return None;
        }
        let end = text.find(' ').unwrap_or(text.len());
        let word = text[..end].to_string();
        *rest = &text[end..];
        Some(word)
    };

    let id = take_word(&mut rest)
        .and_then(|word| word.parse().ok())
        .ok_or_else(|| malformed("missing request id"))?;
    let completed = take_word(&mut rest)
        .and_then(|word| word.parse().ok())
        .ok_or_else(|| malformed("missing completed marker"))?;
    let code = take_word(&mut rest)
        .and_then(|word| word.parse().ok())
        .ok_or_else(|| malformed("missing result code"))?;

    let mut fields = HashMap::new();
    let mut text = rest.trim_start();
    while !text.is_empty() {
        let Some(equals) = text.find('=') else {
            return Err(malformed("field without '='"));
        };
        let key = text[..equals].to_string();
        let (value, remainder) = unquote(&text[equals + 1..]);
        fields.insert(key, value);
        text = remainder.trim_start();
    }
    Ok((id, completed, code, fields))
}

fn quote(value: &str) -> String {
    if !value.is_empty() && !value.contains(' ') && !value.contains('\'') {
        return value.to_string();
    }
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('\'');
    for c in value.chars() {
        if c == '\'' || c == '\\' {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('\'');
    quoted
}

fn unquote(text: &str) -> (String, &str) {
    if let Some(rest) = text.strip_prefix('\'') {
        let mut value = String::new();
        let mut chars = rest.char_indices();
        while let Some((index, c)) = chars.next() {
            match c {
                '\\' => {
                    if let Some((_, escaped)) = chars.next() {
                        value.push(escaped);
                    }
                }
                '\'' => return (value, &rest[index + 1..]),
                other => value.push(other),
            }
        }
        (value, "")
    } else {
        let end = text.find(' ').unwrap_or(text.len());
        (text[..end].to_string(), &text[end..])
    }
}

pub(crate) struct MasterStorage {
    specifier: StorageSpecifier,
    options: StorageOptions,
    io: Option<Arc<ServerIo>>,
}

impl MasterStorage {
    pub(crate) fn new(specifier: &StorageSpecifier, options: &StorageOptions) -> Self {
        MasterStorage {
            specifier: specifier.clone(),
            options: options.clone(),
            io: None,
        }
    }

    fn io(&self) -> Result<Arc<ServerIo>> {
        self.io.clone().ok_or_else(|| Error::Network {
            host: self.specifier.host.clone(),
            reason: "master transport is not connected".to_string(),
        })
    }
}

impl BackendOps for MasterStorage {
    fn backend_name(&self) -> &'static str {
        "master"
    }

    fn connect(&mut self) -> Result<()> {
        let Some(factory) = self.options.master_transport.clone() else {
            return error::NotSupportedSnafu {
                operation: "session setup",
                backend: "master",
            }
            .fail();
        };
        let transport = factory.connect()?;
        self.io = Some(Arc::new(ServerIo::new(transport, self.options.rpc_timeout)));
        Ok(())
    }

    fn disconnect(&mut self) {
        self.io = None;
    }

    fn create(
        &mut self,
        path: &Path,
        size: u64,
        disposition: CreateDisposition,
    ) -> Result<BackendFile> {
        let io = self.io()?;
        if disposition == CreateDisposition::Fail && self.exists(path) {
            return error::FileExistsSnafu { path }.fail();
        }
        let name = path.to_string_lossy();
        let size_text = size.to_string();
        io.execute("STORAGE_CREATE", &[("name", &name), ("size", &size_text)])?;
        Ok(BackendFile::Master(MasterFile {
            io,
            offset: 0,
            size: 0,
        }))
    }

    fn open(&mut self, path: &Path) -> Result<BackendFile> {
        let io = self.io()?;
        let name = path.to_string_lossy();
        let response = io.execute("STORAGE_OPEN", &[("name", &name)])?;
        let size = response
            .field("size")?
            .parse()
            .map_err(|_| Error::Protocol {
                reason: "size field is not a number".to_string(),
            })?;
        Ok(BackendFile::Master(MasterFile {
            io,
            offset: 0,
            size,
        }))
    }

    fn exists(&mut self, path: &Path) -> bool {
        let Ok(io) = self.io() else {
            return false;
        };
        let name = path.to_string_lossy();
        match io.execute("STORAGE_EXISTS", &[("name", &name)]) {
            Ok(response) => response.field("exists").map(|v| v == "1").unwrap_or(false),
            Err(_) => false,
        }
    }

    fn is_file(&mut self, path: &Path) -> bool {
        self.exists(path)
    }

    fn is_directory(&mut self, _path: &Path) -> bool {
        false
    }

    fn is_readable(&mut self, path: &Path) -> bool {
        self.exists(path)
    }

    fn is_writable(&mut self, _path: &Path) -> bool {
        self.io.is_some()
    }

    fn delete(&mut self, path: &Path) -> Result<()> {
        let io = self.io()?;
        let name = path.to_string_lossy();
        io.execute("STORAGE_DELETE", &[("name", &name)])?;
        Ok(())
    }

    fn rename(&mut self, from: &Path, to: &Path) -> Result<()> {
        let io = self.io()?;
        let from = from.to_string_lossy();
        let to = to.to_string_lossy();
        io.execute("STORAGE_RENAME", &[("from", &from), ("to", &to)])?;
        Ok(())
    }

    fn make_directory(&mut self, _path: &Path) -> Result<()> {
        error::NotSupportedSnafu {
            operation: "make directory",
            backend: "master",
        }
        .fail()
    }

    fn file_info(&mut self, _path: &Path) -> Result<FileInfo> {
        error::NotSupportedSnafu {
            operation: "file info",
            backend: "master",
        }
        .fail()
    }

    fn open_directory_list(&mut self, _path: &Path) -> Result<DirectoryList> {
        error::NotSupportedSnafu {
            operation: "directory listing",
            backend: "master",
        }
        .fail()
    }
}

pub(crate) struct MasterFile {
    io: Arc<ServerIo>,
    offset: u64,
    size: u64,
}

impl BackendFileOps for MasterFile {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let length = buf.len().min(MAX_RPC_DATA);
        let offset_text = self.offset.to_string();
        let length_text = length.to_string();
        let response = self.io.execute(
            "STORAGE_READ",
            &[("offset", &offset_text), ("length", &length_text)],
        )?;
        let data = BASE64
            .decode(response.field("data")?)
            .map_err(|_| Error::Protocol {
                reason: "data field is not valid base64".to_string(),
            })?;
        if data.len() > length {
            return Err(Error::Protocol {
                reason: "reply longer than requested".to_string(),
            });
        }
        buf[..data.len()].copy_from_slice(&data);
        self.offset += data.len() as u64;
        Ok(data.len())
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        for chunk in data.chunks(MAX_RPC_DATA) {
            let offset_text = self.offset.to_string();
            let encoded = BASE64.encode(chunk);
            self.io.execute(
                "STORAGE_WRITE",
                &[("offset", &offset_text), ("data", &encoded)],
            )?;
            self.offset += chunk.len() as u64;
            self.size = self.size.max(self.offset);
        }
        Ok(())
    }

    fn seek(&mut self, offset: u64) -> Result<()> {
        self.offset = offset;
        Ok(())
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn close(&mut self) -> Result<()> {
        self.io.execute("STORAGE_CLOSE", &[])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{Storage, StorageOptions};

    /// Scripted peer: answers every command in order with canned
    /// replies, recording what was sent.
    struct ScriptedTransport {
        sent: Arc<Mutex<Vec<String>>>,
        replies: Arc<Mutex<Vec<String>>>,
    }

    impl MasterTransport for ScriptedTransport {
        fn send_line(&mut self, line: &str) -> Result<()> {
            self.sent.lock().unwrap().push(line.to_string());
            Ok(())
        }

        fn recv_line(&mut self, _timeout: Duration) -> Result<Option<String>> {
            let mut replies = self.replies.lock().unwrap();
            if replies.is_empty() {
                Ok(None)
            } else {
                Ok(Some(replies.remove(0)))
            }
        }
    }

    struct ScriptedFactory {
        sent: Arc<Mutex<Vec<String>>>,
        replies: Arc<Mutex<Vec<String>>>,
    }

    impl MasterTransportFactory for ScriptedFactory {
        fn connect(&self) -> Result<Box<dyn MasterTransport>> {
            Ok(Box::new(ScriptedTransport {
                sent: Arc::clone(&self.sent),
                replies: Arc::clone(&self.replies),
            }))
        }
    }

    fn master_storage(replies: Vec<&str>) -> (Storage, Arc<Mutex<Vec<String>>>) {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let scripted = Arc::new(Mutex::new(
            replies.into_iter().map(|s| s.to_string()).collect::<Vec<_>>(),
        ));
        let options = StorageOptions {
            master_transport: Some(Arc::new(ScriptedFactory {
                sent: Arc::clone(&sent),
                replies: scripted,
            })),
            rpc_timeout: Duration::from_millis(200),
            ..Default::default()
        };
        let specifier = StorageSpecifier::parse("master://peer/archive.bar").unwrap();
        (Storage::open(specifier, options).unwrap(), sent)
    }

    #[test]
    fn create_write_close_issue_commands_in_order() {
        let (storage, sent) = master_storage(vec![
            "1 1 0",                // STORAGE_CREATE
            "2 1 0",                // STORAGE_WRITE
            "3 1 0",                // STORAGE_CLOSE
        ]);
        let mut file = storage
            .create(Path::new("archive.bar"), 42, true)
            .unwrap();
        file.write(b"payload").unwrap();
        file.close().unwrap();

        let sent = sent.lock().unwrap();
        assert_eq!(sent[0], "1 STORAGE_CREATE name=archive.bar size=42");
        let encoded = BASE64.encode(b"payload");
        assert_eq!(sent[1], format!("2 STORAGE_WRITE offset=0 data={encoded}"));
        assert_eq!(sent[2], "3 STORAGE_CLOSE");
    }

    #[test]
    fn large_write_is_chunked_with_advancing_offsets() {
        let replies: Vec<String> = (1..=4).map(|id| format!("{id} 1 0")).collect();
        let (storage, sent) = master_storage(replies.iter().map(|s| s.as_str()).collect());

        let mut file = storage
            .create(Path::new("archive.bar"), 0, true)
            .unwrap();
        file.write(&vec![7u8; MAX_RPC_DATA * 2 + 100]).unwrap();

        let sent = sent.lock().unwrap();
        assert!(sent[1].starts_with("2 STORAGE_WRITE offset=0 "));
        assert!(sent[2].starts_with(&format!("3 STORAGE_WRITE offset={} ", MAX_RPC_DATA)));
        assert!(sent[3].starts_with(&format!("4 STORAGE_WRITE offset={} ", MAX_RPC_DATA * 2)));
        drop(file);
    }

    #[test]
    fn error_reply_surfaces_code_and_text() {
        let (storage, _) = master_storage(vec!["1 1 13 error='no space left'"]);
        let result = storage.create(Path::new("archive.bar"), 0, true);
        match result {
            Err(Error::RpcFailed { code, text }) => {
                assert_eq!(code, 13);
                assert_eq!(text, "no space left");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn missing_reply_times_out() {
        let (storage, _) = master_storage(vec![]);
        let result = storage.create(Path::new("archive.bar"), 0, true);
        assert!(matches!(result, Err(Error::RpcTimeout { .. })));
    }

    #[test]
    fn intermediate_and_stale_replies_are_skipped() {
        let (storage, _) = master_storage(vec![
            "99 1 0",  // stale reply from another request
            "1 0 0",   // progress marker
            "1 1 0",   // completion
        ]);
        let result = storage.create(Path::new("archive.bar"), 0, true);
        assert!(result.is_ok());
    }

    #[test]
    fn read_decodes_base64_payload() {
        let encoded = BASE64.encode(b"stored data");
        let data_reply: &'static str = Box::leak(format!("2 1 0 data={encoded}").into_boxed_str());
        let (storage, sent) = master_storage(vec!["1 1 0 size=11", data_reply]);
        let mut file = storage.open_file(Path::new("archive.bar")).unwrap();
        assert_eq!(file.size(), 11);
        let mut buf = [0u8; 64];
        let count = file.read(&mut buf).unwrap();
        assert_eq!(&buf[..count], b"stored data");
        assert!(sent.lock().unwrap()[1].starts_with("2 STORAGE_READ offset=0 length="));
        // No close command scripted; dropping the handle will time out
        // quietly inside Drop.
        std::mem::forget(file);
    }

    #[test]
    fn quoting_round_trips_values_with_spaces() {
        let quoted = quote("a b'c");
        let (value, rest) = unquote(&quoted);
        assert_eq!(value, "a b'c");
        assert!(rest.is_empty());
    }

    #[test]
    fn file_info_is_not_supported() {
        let (storage, _) = master_storage(vec![]);
        let result = storage.file_info(Path::new("archive.bar"));
        assert!(matches!(result, Err(Error::NotSupported { .. })));
    }
}
