//! TFTP Protocol Implementation
//!
//! Packet parsing, packet building and protocol constants for the read-only
//! subset of TFTP this crate serves.
//!
//! # TFTP Protocol Overview
//!
//! TFTP (Trivial File Transfer Protocol) is defined in RFC 1350 with option
//! extensions in RFC 2347 (option negotiation), RFC 2348 (block size) and
//! RFC 2349 (timeout interval and transfer size).
//!
//! The packets this crate deals with are:
//! - Read Request (RRQ) - Request to read a file from the server
//! - Write Request (WRQ) - Recognised only so it can be refused
//! - Data packets - Transfer file content in blocks
//! - Acknowledgment (ACK) - Confirm receipt of data blocks
//! - Error packets - Report errors during transfer
//! - Option acknowledgment (OACK) - Answer negotiated transfer options

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Result, anyhow};

/// TFTP Protocol Opcodes
///
/// These opcodes identify the type of TFTP packet being sent or received.
/// Each opcode corresponds to a specific packet format as defined in RFC 1350.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TftpOpcode {
    /// Read Request (RRQ) - Opcode 1
    ///
    /// Packet format: | Opcode | Filename | 0 | Mode | 0 | \[Options\] |
    ReadRequest = 1,

    /// Write Request (WRQ) - Opcode 2
    ///
    /// Same layout as RRQ. This server never accepts writes.
    WriteRequest = 2,

    /// Data Packet (DATA) - Opcode 3
    ///
    /// Carries one block of file data. A block shorter than the negotiated
    /// block size terminates the transfer.
    ///
    /// Packet format: | Opcode | Block# | Data |
    Data = 3,

    /// Acknowledgment (ACK) - Opcode 4
    ///
    /// Acknowledges receipt of a data packet. ACK with block number 0
    /// acknowledges an OACK packet.
    ///
    /// Packet format: | Opcode | Block# |
    Acknowledgment = 4,

    /// Error Packet (ERROR) - Opcode 5
    ///
    /// Terminates the current transfer.
    ///
    /// Packet format: | Opcode | ErrorCode | ErrMsg | 0 |
    Error = 5,

    /// Option Acknowledgment (OACK) - Opcode 6
    ///
    /// Packet format: | Opcode | Opt1 | 0 | Value1 | 0 | ... |
    OptionAck = 6,
}

impl TftpOpcode {
    /// Convert a u16 value to a TftpOpcode
    ///
    /// # Examples
    /// ```
    /// use tftp::TftpOpcode;
    ///
    /// assert_eq!(TftpOpcode::from_u16(1), Some(TftpOpcode::ReadRequest));
    /// assert_eq!(TftpOpcode::from_u16(99), None);
    /// ```
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            1 => Some(Self::ReadRequest),
            2 => Some(Self::WriteRequest),
            3 => Some(Self::Data),
            4 => Some(Self::Acknowledgment),
            5 => Some(Self::Error),
            6 => Some(Self::OptionAck),
            _ => None,
        }
    }

    /// Convert the opcode to its u16 representation
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    /// Get the human-readable name of the opcode
    ///
    /// # Examples
    /// ```
    /// use tftp::TftpOpcode;
    ///
    /// assert_eq!(TftpOpcode::WriteRequest.name(), "WRQ");
    /// assert_eq!(TftpOpcode::OptionAck.name(), "OACK");
    /// ```
    pub fn name(self) -> &'static str {
        match self {
            Self::ReadRequest => "RRQ",
            Self::WriteRequest => "WRQ",
            Self::Data => "DATA",
            Self::Acknowledgment => "ACK",
            Self::Error => "ERROR",
            Self::OptionAck => "OACK",
        }
    }
}

impl fmt::Display for TftpOpcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// TFTP Error Codes
///
/// Standard error codes as defined in RFC 1350, plus the option negotiation
/// code from RFC 2347.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TftpErrorCode {
    /// Error code 0: Not defined, see the error message
    NotDefined = 0,
    /// Error code 1: File not found
    ///
    /// Boot loaders probing for optional files branch on this code, so it is
    /// reserved for "the file does not exist".
    FileNotFound = 1,
    /// Error code 2: Access violation
    AccessViolation = 2,
    /// Error code 3: Disk full or allocation exceeded
    DiskFull = 3,
    /// Error code 4: Illegal TFTP operation
    IllegalOperation = 4,
    /// Error code 5: Unknown transfer ID
    UnknownTransferId = 5,
    /// Error code 6: File already exists
    FileAlreadyExists = 6,
    /// Error code 7: No such user
    NoSuchUser = 7,
    /// Error code 8: Option negotiation failed (RFC 2347)
    OptionNegotiationFailed = 8,
}

impl TftpErrorCode {
    /// Convert a u16 value to a TftpErrorCode
    ///
    /// # Examples
    /// ```
    /// use tftp::TftpErrorCode;
    ///
    /// assert_eq!(TftpErrorCode::from_u16(1), Some(TftpErrorCode::FileNotFound));
    /// assert_eq!(TftpErrorCode::from_u16(99), None);
    /// ```
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0 => Some(Self::NotDefined),
            1 => Some(Self::FileNotFound),
            2 => Some(Self::AccessViolation),
            3 => Some(Self::DiskFull),
            4 => Some(Self::IllegalOperation),
            5 => Some(Self::UnknownTransferId),
            6 => Some(Self::FileAlreadyExists),
            7 => Some(Self::NoSuchUser),
            8 => Some(Self::OptionNegotiationFailed),
            _ => None,
        }
    }

    /// Convert the error code to its u16 representation
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    /// Get the default error message for this error code
    pub fn default_message(self) -> &'static str {
        match self {
            Self::NotDefined => "Undefined error",
            Self::FileNotFound => "File not found",
            Self::AccessViolation => "Access violation",
            Self::DiskFull => "Disk full or allocation exceeded",
            Self::IllegalOperation => "Illegal TFTP operation",
            Self::UnknownTransferId => "Unknown transfer ID",
            Self::FileAlreadyExists => "File already exists",
            Self::NoSuchUser => "No such user",
            Self::OptionNegotiationFailed => "Option negotiation failed",
        }
    }
}

impl fmt::Display for TftpErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.default_message(), self.as_u16())
    }
}

/// TFTP Transfer Modes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferMode {
    /// Binary mode, bytes are sent as-is
    Octet,
    /// Text mode with CR-LF line endings
    NetAscii,
}

impl TransferMode {
    /// Parse a transfer mode, ignoring case
    ///
    /// # Examples
    /// ```
    /// use tftp::TransferMode;
    ///
    /// assert_eq!(TransferMode::from_str_opt("OCTET"), Some(TransferMode::Octet));
    /// assert_eq!(TransferMode::from_str_opt("mail"), None);
    /// ```
    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "octet" => Some(Self::Octet),
            "netascii" => Some(Self::NetAscii),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Octet => "octet",
            Self::NetAscii => "netascii",
        }
    }

    /// Check if this transfer mode can be served
    ///
    /// Handlers stream bytes of unknown content, and netascii translation
    /// would invalidate any transfer size reported up front, so only octet
    /// transfers are served.
    pub fn is_supported(self) -> bool {
        matches!(self, Self::Octet)
    }
}

impl FromStr for TransferMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_str_opt(s).ok_or_else(|| format!("Unsupported transfer mode: {}", s))
    }
}

impl fmt::Display for TransferMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Block Size Configuration (RFC 2348)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockSizeConfig {
    /// The negotiated block size in bytes
    pub size: usize,
}

impl BlockSizeConfig {
    /// Default TFTP block size (512 bytes)
    pub const DEFAULT: usize = 512;

    /// Smallest block size RFC 2348 allows a client to request
    pub const MIN: usize = 8;

    /// Maximum allowed block size (1400 bytes)
    ///
    /// Keeps DATA packets inside a standard Ethernet MTU with room for the
    /// UDP/IP headers.
    pub const MAX: usize = 1400;

    pub fn default_size() -> Self {
        Self { size: Self::DEFAULT }
    }

    /// Create a BlockSizeConfig from a requested option value
    ///
    /// Values above [`Self::MAX`] are clamped; unparsable values or values
    /// below [`Self::MIN`] yield `None`, meaning the option is not answered.
    ///
    /// # Examples
    /// ```
    /// use tftp::BlockSizeConfig;
    ///
    /// assert_eq!(BlockSizeConfig::from_option("1024").map(|c| c.size), Some(1024));
    /// assert_eq!(BlockSizeConfig::from_option("65464").map(|c| c.size), Some(1400));
    /// assert_eq!(BlockSizeConfig::from_option("4"), None);
    /// assert_eq!(BlockSizeConfig::from_option("large"), None);
    /// ```
    pub fn from_option(value: &str) -> Option<Self> {
        value
            .parse::<usize>()
            .ok()
            .filter(|&n| n >= Self::MIN)
            .map(|n| Self {
                size: n.min(Self::MAX),
            })
    }
}

impl Default for BlockSizeConfig {
    fn default() -> Self {
        Self::default_size()
    }
}

impl fmt::Display for BlockSizeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.size)
    }
}

/// Parse a requested `timeout` option (RFC 2349), in whole seconds 1..=255
///
/// # Examples
/// ```
/// use std::time::Duration;
/// use tftp::parse_timeout_option;
///
/// assert_eq!(parse_timeout_option("3"), Some(Duration::from_secs(3)));
/// assert_eq!(parse_timeout_option("0"), None);
/// assert_eq!(parse_timeout_option("300"), None);
/// ```
pub fn parse_timeout_option(value: &str) -> Option<Duration> {
    value
        .parse::<u8>()
        .ok()
        .filter(|&secs| secs > 0)
        .map(|secs| Duration::from_secs(u64::from(secs)))
}

/// TFTP Request (RRQ/WRQ) representation
#[derive(Debug, Clone, PartialEq)]
pub struct TftpRequest {
    /// The request opcode (RRQ or WRQ)
    pub opcode: TftpOpcode,
    /// Requested filename, exactly as the client sent it
    pub filename: String,
    /// Transfer mode
    pub mode: TransferMode,
    /// Requested options, keys lowercased
    pub options: HashMap<String, String>,
}

impl TftpRequest {
    /// Create a new read request
    ///
    /// # Examples
    /// ```
    /// use tftp::{TftpRequest, TransferMode};
    ///
    /// let mut request = TftpRequest::read_request("pxelinux.0", TransferMode::Octet);
    /// request.with_option("tsize", "0");
    /// assert!(request.wants_transfer_size());
    /// ```
    pub fn read_request(filename: impl Into<String>, mode: TransferMode) -> Self {
        Self {
            opcode: TftpOpcode::ReadRequest,
            filename: filename.into(),
            mode,
            options: HashMap::new(),
        }
    }

    /// Add an option to the request
    pub fn with_option(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.options.insert(key.into().to_ascii_lowercase(), value.into());
        self
    }

    /// Whether the client asked for the transfer size (RFC 2349)
    pub fn wants_transfer_size(&self) -> bool {
        self.options.contains_key("tsize")
    }

    /// Encode the request, used by clients and tests
    pub fn to_packet(&self) -> Vec<u8> {
        let mut v = Vec::with_capacity(4 + self.filename.len() + 8);
        v.extend_from_slice(&self.opcode.as_u16().to_be_bytes());
        v.extend_from_slice(self.filename.as_bytes());
        v.push(0);
        v.extend_from_slice(self.mode.as_str().as_bytes());
        v.push(0);
        for (key, val) in &self.options {
            v.extend_from_slice(key.as_bytes());
            v.push(0);
            v.extend_from_slice(val.as_bytes());
            v.push(0);
        }
        v
    }
}

/// TFTP Error packet representation
///
/// Also the error type read handlers return: the server sends it to the
/// client verbatim.
#[derive(Debug, Clone, PartialEq)]
pub struct TftpError {
    /// Error code
    pub code: TftpErrorCode,
    /// Human-readable error message
    pub message: String,
}

impl TftpError {
    /// Create a new error with a custom message
    pub fn new(code: TftpErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Create a new error with the default message for the error code
    ///
    /// # Examples
    /// ```
    /// use tftp::{TftpError, TftpErrorCode};
    ///
    /// let error = TftpError::with_default_message(TftpErrorCode::AccessViolation);
    /// assert_eq!(error.message, "Access violation");
    /// ```
    pub fn with_default_message(code: TftpErrorCode) -> Self {
        Self::new(code, code.default_message())
    }

    pub fn file_not_found() -> Self {
        Self::with_default_message(TftpErrorCode::FileNotFound)
    }

    pub fn illegal_operation(message: impl Into<String>) -> Self {
        Self::new(TftpErrorCode::IllegalOperation, message)
    }

    /// Generic failure (code 0) carrying a free-form message
    pub fn undefined(message: impl Into<String>) -> Self {
        Self::new(TftpErrorCode::NotDefined, message)
    }

    /// Encode as an ERROR packet
    pub fn to_packet(&self) -> Vec<u8> {
        build_error(self.code.as_u16(), &self.message)
    }
}

impl fmt::Display for TftpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for TftpError {}

/// Find the next null byte in a buffer starting from a given position
pub fn find_zero(buf: &[u8], start: usize) -> Option<usize> {
    buf.get(start..)?
        .iter()
        .position(|&b| b == 0)
        .map(|pos| start + pos)
}

/// Parse a TFTP request packet (RRQ or WRQ)
///
/// Option names are case-insensitive (RFC 2347) and are lowercased. A
/// trailing option name without a value is ignored.
pub fn parse_request(buf: &[u8]) -> Result<TftpRequest> {
    if buf.len() < 4 {
        return Err(anyhow!("request too short"));
    }

    let opcode = match get_tftp_opcode(buf) {
        Some(op @ (TftpOpcode::ReadRequest | TftpOpcode::WriteRequest)) => op,
        _ => return Err(anyhow!("Not a request packet")),
    };

    let mut i = 2;

    let fname_end = find_zero(buf, i).ok_or_else(|| anyhow!("filename not terminated"))?;
    let filename = std::str::from_utf8(&buf[i..fname_end])?.to_string();
    i = fname_end + 1;

    let mode_end = find_zero(buf, i).ok_or_else(|| anyhow!("mode not terminated"))?;
    let mode_str = std::str::from_utf8(&buf[i..mode_end])?;
    let mode: TransferMode = mode_str.parse().map_err(|e: String| anyhow!(e))?;
    i = mode_end + 1;

    let mut options = HashMap::new();
    while i < buf.len() {
        let key_end = find_zero(buf, i).ok_or_else(|| anyhow!("option key not terminated"))?;
        let key = std::str::from_utf8(&buf[i..key_end])?.to_ascii_lowercase();
        i = key_end + 1;

        if i >= buf.len() {
            break;
        }

        let val_end = find_zero(buf, i).ok_or_else(|| anyhow!("option value not terminated"))?;
        let val = std::str::from_utf8(&buf[i..val_end])?.to_string();
        i = val_end + 1;

        options.insert(key, val);
    }

    Ok(TftpRequest {
        opcode,
        filename,
        mode,
        options,
    })
}

/// Parse a TFTP ACK packet, returning the acknowledged block number
pub fn parse_ack(buf: &[u8]) -> Result<u16> {
    if buf.len() < 4 {
        return Err(anyhow!("ACK too short"));
    }

    if get_tftp_opcode(buf) != Some(TftpOpcode::Acknowledgment) {
        return Err(anyhow!("Not an ACK packet"));
    }

    Ok(u16::from_be_bytes([buf[2], buf[3]]))
}

/// Parse a TFTP Error packet
pub fn parse_error(buf: &[u8]) -> Result<(u16, String)> {
    if buf.len() < 4 {
        return Err(anyhow!("Error packet too short"));
    }

    if get_tftp_opcode(buf) != Some(TftpOpcode::Error) {
        return Err(anyhow!("Not an Error packet"));
    }

    let code = u16::from_be_bytes([buf[2], buf[3]]);
    let msg_bytes = &buf[4..];
    let end = msg_bytes.iter().position(|&b| b == 0).unwrap_or(msg_bytes.len());
    let message = String::from_utf8_lossy(&msg_bytes[..end]).into_owned();

    Ok((code, message))
}

/// Build a TFTP Data packet
pub fn build_data(block: u16, data: &[u8]) -> Vec<u8> {
    let mut v = Vec::with_capacity(4 + data.len());
    v.extend_from_slice(&TftpOpcode::Data.as_u16().to_be_bytes());
    v.extend_from_slice(&block.to_be_bytes());
    v.extend_from_slice(data);
    v
}

/// Build a TFTP ACK packet
pub fn build_ack(block: u16) -> Vec<u8> {
    let mut v = Vec::with_capacity(4);
    v.extend_from_slice(&TftpOpcode::Acknowledgment.as_u16().to_be_bytes());
    v.extend_from_slice(&block.to_be_bytes());
    v
}

/// Build a TFTP Error packet
pub fn build_error(code: u16, msg: &str) -> Vec<u8> {
    let mut v = Vec::with_capacity(4 + msg.len() + 1);
    v.extend_from_slice(&TftpOpcode::Error.as_u16().to_be_bytes());
    v.extend_from_slice(&code.to_be_bytes());
    v.extend_from_slice(msg.as_bytes());
    v.push(0);
    v
}

/// Build a TFTP OACK (Option Acknowledgment) packet
pub fn build_oack(opts: &HashMap<String, String>) -> Vec<u8> {
    let mut v = Vec::new();
    v.extend_from_slice(&TftpOpcode::OptionAck.as_u16().to_be_bytes());

    for (key, val) in opts {
        v.extend_from_slice(key.as_bytes());
        v.push(0);
        v.extend_from_slice(val.as_bytes());
        v.push(0);
    }

    v
}

/// Parse an OACK packet into its option map
pub fn parse_oack(buf: &[u8]) -> Result<HashMap<String, String>> {
    if get_tftp_opcode(buf) != Some(TftpOpcode::OptionAck) {
        return Err(anyhow!("Not an OACK packet"));
    }

    let mut options = HashMap::new();
    let mut i = 2;
    while i < buf.len() {
        let key_end = find_zero(buf, i).ok_or_else(|| anyhow!("option key not terminated"))?;
        let val_end = find_zero(buf, key_end + 1).ok_or_else(|| anyhow!("option value not terminated"))?;
        let key = std::str::from_utf8(&buf[i..key_end])?.to_string();
        let val = std::str::from_utf8(&buf[key_end + 1..val_end])?.to_string();
        options.insert(key, val);
        i = val_end + 1;
    }

    Ok(options)
}

/// Get the opcode from a TFTP packet
pub fn get_opcode(buf: &[u8]) -> Option<u16> {
    if buf.len() >= 2 {
        Some(u16::from_be_bytes([buf[0], buf[1]]))
    } else {
        None
    }
}

/// Get the TFTP opcode enum from a packet buffer
pub fn get_tftp_opcode(buf: &[u8]) -> Option<TftpOpcode> {
    get_opcode(buf).and_then(TftpOpcode::from_u16)
}
