//! TLS ClientHello decoding for SNI extraction.
//!
//! The SNI proxy only ever looks at the first chunk a client sends. This module
//! walks that chunk with fixed-offset arithmetic and pulls out the hostname
//! carried by the `server_name` extension, without terminating or validating
//! TLS beyond the fields it has to step over.
//!
//! # Record layout
//!
//! ```text
//! [0]       record type (0x16 = handshake)
//! [1..5]    record version + record length
//! [5..43]   handshake type, 24-bit length, client version, 32-byte random
//! [43]      session id length, then session id
//! [..]      u16 cipher suites length, then cipher suites
//! [..]      u8 compression methods length, then methods
//! [..]      u16 extensions length, then extensions:
//!             u16 type, u16 length, payload
//! ```
//!
//! Inside `server_name` (type `0x0000`): u16 list length, u8 name type,
//! u16 name length, then the hostname bytes.
//!
//! Every read is bounds-checked. A buffer that ends early, declares lengths
//! past its end, or is not a handshake record yields "no hostname".

use thiserror::Error;

/// TLS record content type for handshake messages.
pub const TLS_HANDSHAKE_RECORD: u8 = 0x16;

/// Extension type code of `server_name`.
pub const SERVER_NAME_EXTENSION: u16 = 0x0000;

const RECORD_HEADER_LEN: usize = 5;

/// Handshake type (1), handshake length (3), client version (2), random (32).
const HANDSHAKE_FIXED_LEN: usize = 38;

const EXTENSION_HEADER_LEN: usize = 4;

/// Reasons a buffer could not be decoded down to a server name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientHelloError {
    /// The first byte is not the TLS handshake record type.
    #[error("not a TLS handshake record (first byte {0:#04x})")]
    NotHandshake(u8),

    /// The buffer is empty.
    #[error("empty buffer")]
    Empty,

    /// A length field points past the end of the buffer, or a field is invalid.
    #[error("malformed ClientHello: {0}")]
    Malformed(&'static str),
}

/// Bounds-checked cursor over a borrowed byte buffer.
struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    fn skip(&mut self, n: usize, what: &'static str) -> Result<(), ClientHelloError> {
        if n > self.remaining() {
            return Err(ClientHelloError::Malformed(what));
        }
        self.pos += n;
        Ok(())
    }

    fn read_u8(&mut self, what: &'static str) -> Result<u8, ClientHelloError> {
        let byte = *self
            .buf
            .get(self.pos)
            .ok_or(ClientHelloError::Malformed(what))?;
        self.pos += 1;
        Ok(byte)
    }

    fn read_u16(&mut self, what: &'static str) -> Result<u16, ClientHelloError> {
        let bytes = self.take(2, what)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn take(&mut self, n: usize, what: &'static str) -> Result<&'a [u8], ClientHelloError> {
        if n > self.remaining() {
            return Err(ClientHelloError::Malformed(what));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }
}

/// Decode the SNI hostname from the first chunk of a TLS connection.
///
/// Returns `Ok(None)` when the ClientHello is well-formed up to the extensions
/// but carries no `server_name` extension. Only the first `server_name`
/// extension is considered.
pub fn parse_server_name(buf: &[u8]) -> Result<Option<String>, ClientHelloError> {
    let first = *buf.first().ok_or(ClientHelloError::Empty)?;
    if first != TLS_HANDSHAKE_RECORD {
        return Err(ClientHelloError::NotHandshake(first));
    }

    let mut cursor = Cursor::new(buf);
    cursor.skip(RECORD_HEADER_LEN, "record header")?;
    cursor.skip(HANDSHAKE_FIXED_LEN, "handshake header")?;

    let session_id_len = cursor.read_u8("session id length")? as usize;
    cursor.skip(session_id_len, "session id")?;

    let cipher_suites_len = cursor.read_u16("cipher suites length")? as usize;
    cursor.skip(cipher_suites_len, "cipher suites")?;

    let compression_len = cursor.read_u8("compression methods length")? as usize;
    cursor.skip(compression_len, "compression methods")?;

    let extensions_len = cursor.read_u16("extensions length")? as usize;
    let extensions_end = cursor.pos + extensions_len;

    while cursor.pos + EXTENSION_HEADER_LEN <= extensions_end
        && cursor.pos + EXTENSION_HEADER_LEN <= buf.len()
    {
        let ext_type = cursor.read_u16("extension type")?;
        let ext_len = cursor.read_u16("extension length")? as usize;

        if ext_type == SERVER_NAME_EXTENSION && ext_len <= cursor.remaining() {
            return parse_server_name_extension(&mut cursor).map(Some);
        }

        // Declared past the buffer end: the next header check ends the loop.
        cursor.pos += ext_len;
    }

    Ok(None)
}

fn parse_server_name_extension(cursor: &mut Cursor<'_>) -> Result<String, ClientHelloError> {
    let _list_len = cursor.read_u16("server name list length")?;
    let _name_type = cursor.read_u8("server name type")?;
    let name_len = cursor.read_u16("server name length")? as usize;
    let name = cursor.take(name_len, "server name")?;

    if name.is_empty() {
        return Err(ClientHelloError::Malformed("empty server name"));
    }

    std::str::from_utf8(name)
        .map(str::to_owned)
        .map_err(|_| ClientHelloError::Malformed("server name is not UTF-8"))
}

/// Lenient form of [`parse_server_name`]: any failure is "no hostname".
pub fn extract_sni(buf: &[u8]) -> Option<String> {
    parse_server_name(buf).ok().flatten()
}
