// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Addressing and endpoint types.
//!
//! - **NodeId**: namespace index plus numeric, string, GUID or opaque identifier
//! - **IdentifierPath**: validated builder for hierarchical string identifiers
//! - **QualifiedName / BrowsePath**: namespace-qualified names for path resolution
//! - **Endpoint / Credentials**: where and how to connect
//!
//! # Examples
//!
//! ```
//! use uasub_core::types::{BrowsePath, IdentifierPath, NodeId};
//!
//! let identifier = IdentifierPath::builder()
//!     .separator('!')
//!     .segment("TYPES")
//!     .segment("C")
//!     .segment("CONTROL_VALVE")
//!     .segment("COV01.VA12_LIQ_MASS_FLOW")
//!     .build()
//!     .unwrap();
//! assert_eq!(
//!     identifier.node_id(2).to_string(),
//!     "ns=2;s=TYPES!C!CONTROL_VALVE!COV01.VA12_LIQ_MASS_FLOW"
//! );
//!
//! let path: BrowsePath = "0:Objects/2:Simulation".parse().unwrap();
//! assert_eq!(path.len(), 2);
//! ```

use std::fmt;
use std::str::FromStr;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ClientError, ClientResult, ConfigurationError, ConnectionError};

// =============================================================================
// NodeId
// =============================================================================

/// OPC UA node identifier.
///
/// Equality and hashing are value-based, so a `NodeId` can be used directly as
/// a map key.
///
/// ```
/// use uasub_core::types::NodeId;
///
/// let parsed: NodeId = "ns=2;s=Pump.Speed".parse().unwrap();
/// assert_eq!(parsed, NodeId::string(2, "Pump.Speed"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId {
    /// Namespace index (0 = OPC UA standard namespace).
    pub namespace_index: u16,

    /// The node identifier.
    pub identifier: NodeIdentifier,
}

impl NodeId {
    /// Creates a node id from any identifier kind.
    #[inline]
    pub fn new(namespace_index: u16, identifier: impl Into<NodeIdentifier>) -> Self {
        Self {
            namespace_index,
            identifier: identifier.into(),
        }
    }

    /// Creates a numeric node id.
    #[inline]
    pub fn numeric(namespace_index: u16, value: u32) -> Self {
        Self::new(namespace_index, NodeIdentifier::Numeric(value))
    }

    /// Creates a string node id.
    #[inline]
    pub fn string(namespace_index: u16, value: impl Into<String>) -> Self {
        Self::new(namespace_index, NodeIdentifier::String(value.into()))
    }

    /// Creates a GUID node id.
    #[inline]
    pub fn guid(namespace_index: u16, value: Uuid) -> Self {
        Self::new(namespace_index, NodeIdentifier::Guid(value))
    }

    /// Creates an opaque node id.
    #[inline]
    pub fn opaque(namespace_index: u16, value: Vec<u8>) -> Self {
        Self::new(namespace_index, NodeIdentifier::Opaque(value))
    }

    // =========================================================================
    // Standard Node IDs
    // =========================================================================

    /// Root folder node (ns=0, i=84).
    pub const ROOT_FOLDER: NodeId = NodeId {
        namespace_index: 0,
        identifier: NodeIdentifier::Numeric(84),
    };

    /// Objects folder node (ns=0, i=85).
    pub const OBJECTS_FOLDER: NodeId = NodeId {
        namespace_index: 0,
        identifier: NodeIdentifier::Numeric(85),
    };

    /// Types folder node (ns=0, i=86).
    pub const TYPES_FOLDER: NodeId = NodeId {
        namespace_index: 0,
        identifier: NodeIdentifier::Numeric(86),
    };

    /// Views folder node (ns=0, i=87).
    pub const VIEWS_FOLDER: NodeId = NodeId {
        namespace_index: 0,
        identifier: NodeIdentifier::Numeric(87),
    };

    /// Server node (ns=0, i=2253), the default event notifier.
    pub const SERVER: NodeId = NodeId {
        namespace_index: 0,
        identifier: NodeIdentifier::Numeric(2253),
    };

    /// Returns `true` if this node lives in the standard namespace.
    #[inline]
    pub const fn is_standard(&self) -> bool {
        self.namespace_index == 0
    }

    /// Returns the string identifier, if any.
    pub fn as_string(&self) -> Option<&str> {
        match &self.identifier {
            NodeIdentifier::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the numeric identifier, if any.
    pub fn as_numeric(&self) -> Option<u32> {
        match self.identifier {
            NodeIdentifier::Numeric(v) => Some(v),
            _ => None,
        }
    }

    /// Converts to the OPC UA string format.
    ///
    /// Format: `ns=<namespace>;{i|s|g|b}=<identifier>`, with the `ns=` part
    /// omitted for namespace 0.
    pub fn to_opc_string(&self) -> String {
        if self.namespace_index == 0 {
            self.identifier.to_string()
        } else {
            format!("ns={};{}", self.namespace_index, self.identifier)
        }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_opc_string())
    }
}

impl FromStr for NodeId {
    type Err = ClientError;

    /// Parses `ns=2;i=1001`, `ns=2;s=Name`, `ns=2;g=<uuid>`, `ns=2;b=<base64>`,
    /// or the same forms without `ns=` for namespace 0.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let invalid = |reason: String| {
            ClientError::configuration(ConfigurationError::invalid_node_id(s, reason))
        };

        let (namespace_index, identifier_part) = match s.strip_prefix("ns=") {
            Some(rest) => {
                let (ns, id) = rest
                    .split_once(';')
                    .ok_or_else(|| invalid("Missing identifier after namespace".into()))?;
                let ns: u16 = ns
                    .parse()
                    .map_err(|_| invalid("Invalid namespace index".into()))?;
                (ns, id)
            }
            None => (0, s),
        };

        let identifier = if let Some(id) = identifier_part.strip_prefix("i=") {
            NodeIdentifier::Numeric(
                id.parse()
                    .map_err(|_| invalid("Invalid numeric identifier".into()))?,
            )
        } else if let Some(id) = identifier_part.strip_prefix("s=") {
            if id.is_empty() {
                return Err(invalid("Empty string identifier".into()));
            }
            NodeIdentifier::String(id.to_string())
        } else if let Some(id) = identifier_part.strip_prefix("g=") {
            NodeIdentifier::Guid(
                Uuid::parse_str(id).map_err(|e| invalid(format!("Invalid GUID: {}", e)))?,
            )
        } else if let Some(id) = identifier_part.strip_prefix("b=") {
            NodeIdentifier::Opaque(
                BASE64
                    .decode(id)
                    .map_err(|e| invalid(format!("Invalid base64: {}", e)))?,
            )
        } else {
            return Err(invalid(
                "Unknown identifier type. Expected i=, s=, g=, or b=".into(),
            ));
        };

        Ok(Self {
            namespace_index,
            identifier,
        })
    }
}

// =============================================================================
// NodeIdentifier
// =============================================================================

/// The identifier part of a [`NodeId`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum NodeIdentifier {
    /// Numeric identifier.
    Numeric(u32),
    /// String identifier.
    String(String),
    /// GUID identifier.
    Guid(Uuid),
    /// Opaque byte string identifier.
    Opaque(Vec<u8>),
}

impl fmt::Display for NodeIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Numeric(v) => write!(f, "i={}", v),
            Self::String(v) => write!(f, "s={}", v),
            Self::Guid(v) => write!(f, "g={}", v),
            Self::Opaque(v) => write!(f, "b={}", BASE64.encode(v)),
        }
    }
}

impl From<u32> for NodeIdentifier {
    fn from(value: u32) -> Self {
        Self::Numeric(value)
    }
}

impl From<&str> for NodeIdentifier {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for NodeIdentifier {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<Uuid> for NodeIdentifier {
    fn from(value: Uuid) -> Self {
        Self::Guid(value)
    }
}

impl From<&IdentifierPath> for NodeIdentifier {
    fn from(value: &IdentifierPath) -> Self {
        Self::String(value.to_identifier())
    }
}

// =============================================================================
// NodeClass
// =============================================================================

/// OPC UA node class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeClass {
    /// Object node.
    Object,
    /// Variable node.
    Variable,
    /// Method node.
    Method,
    /// Object type node.
    ObjectType,
    /// Variable type node.
    VariableType,
    /// Reference type node.
    ReferenceType,
    /// Data type node.
    DataType,
    /// View node.
    View,
}

impl NodeClass {
    /// Returns the OPC UA bit mask value.
    pub const fn value(&self) -> u32 {
        match self {
            Self::Object => 1,
            Self::Variable => 2,
            Self::Method => 4,
            Self::ObjectType => 8,
            Self::VariableType => 16,
            Self::ReferenceType => 32,
            Self::DataType => 64,
            Self::View => 128,
        }
    }

    /// Creates from the OPC UA value.
    pub fn from_value(value: u32) -> Option<Self> {
        match value {
            1 => Some(Self::Object),
            2 => Some(Self::Variable),
            4 => Some(Self::Method),
            8 => Some(Self::ObjectType),
            16 => Some(Self::VariableType),
            32 => Some(Self::ReferenceType),
            64 => Some(Self::DataType),
            128 => Some(Self::View),
            _ => None,
        }
    }

    /// Returns `true` if the node can be monitored for the given kind.
    pub const fn supports(&self, kind: MonitorKind) -> bool {
        match kind {
            MonitorKind::DataChange => matches!(self, Self::Variable),
            MonitorKind::Event => matches!(self, Self::Object | Self::View),
        }
    }

    /// Returns the display name.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Object => "Object",
            Self::Variable => "Variable",
            Self::Method => "Method",
            Self::ObjectType => "ObjectType",
            Self::VariableType => "VariableType",
            Self::ReferenceType => "ReferenceType",
            Self::DataType => "DataType",
            Self::View => "View",
        }
    }
}

impl fmt::Display for NodeClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// MonitorKind
// =============================================================================

/// What a monitored item reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MonitorKind {
    /// Value changes of a variable.
    #[default]
    DataChange,
    /// Events emitted by an object.
    Event,
}

impl MonitorKind {
    /// Returns the string representation.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::DataChange => "data_change",
            Self::Event => "event",
        }
    }
}

impl fmt::Display for MonitorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// IdentifierPath
// =============================================================================

/// A hierarchical string identifier built from validated segments.
///
/// Servers that encode hierarchy into string identifiers join segments with
/// a separator character. Building the identifier through this type rejects
/// empty segments and segments containing the separator, which would
/// otherwise silently produce a different identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdentifierPath {
    separator: char,
    segments: Vec<String>,
}

impl IdentifierPath {
    /// Default segment separator.
    pub const DEFAULT_SEPARATOR: char = '.';

    /// Creates a new builder.
    pub fn builder() -> IdentifierPathBuilder {
        IdentifierPathBuilder::default()
    }

    /// Returns the separator.
    pub fn separator(&self) -> char {
        self.separator
    }

    /// Returns the segments.
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Returns the joined identifier string.
    pub fn to_identifier(&self) -> String {
        let mut sep = [0u8; 4];
        self.segments.join(self.separator.encode_utf8(&mut sep))
    }

    /// Returns a string node id in the given namespace.
    pub fn node_id(&self, namespace_index: u16) -> NodeId {
        NodeId::string(namespace_index, self.to_identifier())
    }

    /// Returns a new path with one more segment.
    pub fn child(&self, segment: impl Into<String>) -> ClientResult<Self> {
        let segment = segment.into();
        validate_identifier_segment(&segment, self.separator)?;
        let mut segments = self.segments.clone();
        segments.push(segment);
        Ok(Self {
            separator: self.separator,
            segments,
        })
    }
}

impl fmt::Display for IdentifierPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_identifier())
    }
}

fn validate_identifier_segment(segment: &str, separator: char) -> ClientResult<()> {
    let reason = if segment.is_empty() {
        Some("segment is empty".to_string())
    } else if segment.contains(separator) {
        Some(format!("segment contains separator '{}'", separator))
    } else if segment.chars().any(char::is_control) {
        Some("segment contains control characters".to_string())
    } else {
        None
    };

    match reason {
        Some(reason) => Err(ClientError::configuration(
            ConfigurationError::invalid_path_segment(segment, reason),
        )),
        None => Ok(()),
    }
}

/// Builder for [`IdentifierPath`].
#[derive(Debug, Clone)]
pub struct IdentifierPathBuilder {
    separator: char,
    segments: Vec<String>,
}

impl Default for IdentifierPathBuilder {
    fn default() -> Self {
        Self {
            separator: IdentifierPath::DEFAULT_SEPARATOR,
            segments: Vec::new(),
        }
    }
}

impl IdentifierPathBuilder {
    /// Sets the separator character.
    pub fn separator(mut self, separator: char) -> Self {
        self.separator = separator;
        self
    }

    /// Appends a segment.
    pub fn segment(mut self, segment: impl Into<String>) -> Self {
        self.segments.push(segment.into());
        self
    }

    /// Appends several segments.
    pub fn segments<I, S>(mut self, segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.segments.extend(segments.into_iter().map(Into::into));
        self
    }

    /// Validates the segments and builds the path.
    pub fn build(self) -> ClientResult<IdentifierPath> {
        if self.separator.is_control() || self.separator.is_whitespace() {
            return Err(ClientError::configuration(ConfigurationError::invalid_value(
                "separator",
                "separator must be a visible character",
            )));
        }
        if self.segments.is_empty() {
            return Err(ClientError::configuration(ConfigurationError::invalid_value(
                "segments",
                "identifier path needs at least one segment",
            )));
        }
        for segment in &self.segments {
            validate_identifier_segment(segment, self.separator)?;
        }

        Ok(IdentifierPath {
            separator: self.separator,
            segments: self.segments,
        })
    }
}

// =============================================================================
// QualifiedName
// =============================================================================

/// A namespace-qualified browse name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QualifiedName {
    /// Namespace index.
    pub namespace_index: u16,

    /// The name string.
    pub name: String,
}

impl QualifiedName {
    /// Creates a new qualified name.
    pub fn new(namespace_index: u16, name: impl Into<String>) -> Self {
        Self {
            namespace_index,
            name: name.into(),
        }
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace_index, self.name)
    }
}

impl FromStr for QualifiedName {
    type Err = ClientError;

    /// Parses `"2:Name"`. A name without a namespace prefix is namespace 0.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (namespace_index, name) = match s.split_once(':') {
            Some((ns, name)) => match ns.parse::<u16>() {
                Ok(ns) => (ns, name),
                Err(_) => (0, s),
            },
            None => (0, s),
        };

        if name.is_empty() {
            return Err(ClientError::configuration(
                ConfigurationError::invalid_path_segment(s, "browse name is empty"),
            ));
        }
        if name.contains('/') {
            return Err(ClientError::configuration(
                ConfigurationError::invalid_path_segment(s, "browse name contains '/'"),
            ));
        }

        Ok(Self::new(namespace_index, name))
    }
}

// =============================================================================
// BrowsePath
// =============================================================================

/// An ordered list of qualified names walked from a root node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BrowsePath {
    segments: Vec<QualifiedName>,
}

impl BrowsePath {
    /// Creates an empty path.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a path from segment strings such as `["0:Objects", "2:Simulation"]`.
    pub fn from_segments<I, S>(segments: I) -> ClientResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let segments = segments
            .into_iter()
            .map(|s| s.as_ref().parse())
            .collect::<ClientResult<Vec<QualifiedName>>>()?;
        Ok(Self { segments })
    }

    /// Appends a segment.
    pub fn segment(mut self, namespace_index: u16, name: impl Into<String>) -> Self {
        self.segments.push(QualifiedName::new(namespace_index, name));
        self
    }

    /// Returns the segments.
    pub fn segments(&self) -> &[QualifiedName] {
        &self.segments
    }

    /// Returns the number of segments.
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Returns `true` if there are no segments.
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}

impl fmt::Display for BrowsePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                f.write_str("/")?;
            }
            write!(f, "{}", segment)?;
        }
        Ok(())
    }
}

impl FromStr for BrowsePath {
    type Err = ClientError;

    /// Parses `"0:Objects/2:Simulation/2:TYPES"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_segments(s.split('/').filter(|p| !p.is_empty()))
    }
}

// =============================================================================
// SecurityMode
// =============================================================================

/// OPC UA message security mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SecurityMode {
    /// No security.
    #[default]
    None,
    /// Messages are signed.
    Sign,
    /// Messages are signed and encrypted.
    SignAndEncrypt,
}

impl SecurityMode {
    /// Returns the display name.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::None => "None",
            Self::Sign => "Sign",
            Self::SignAndEncrypt => "SignAndEncrypt",
        }
    }
}

impl fmt::Display for SecurityMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SecurityMode {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace(['-', '_'], "").as_str() {
            "none" => Ok(Self::None),
            "sign" => Ok(Self::Sign),
            "signandencrypt" => Ok(Self::SignAndEncrypt),
            _ => Err(ClientError::configuration(ConfigurationError::invalid_value(
                "security_mode",
                format!("unknown security mode '{}'", s),
            ))),
        }
    }
}

// =============================================================================
// SecurityPolicy
// =============================================================================

/// OPC UA security policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SecurityPolicy {
    /// No security policy.
    #[default]
    None,
    /// Basic256Sha256.
    Basic256Sha256,
    /// Aes128Sha256RsaOaep.
    Aes128Sha256RsaOaep,
    /// Aes256Sha256RsaPss.
    Aes256Sha256RsaPss,
}

impl SecurityPolicy {
    /// Returns the policy URI.
    pub const fn uri(&self) -> &'static str {
        match self {
            Self::None => "http://opcfoundation.org/UA/SecurityPolicy#None",
            Self::Basic256Sha256 => "http://opcfoundation.org/UA/SecurityPolicy#Basic256Sha256",
            Self::Aes128Sha256RsaOaep => {
                "http://opcfoundation.org/UA/SecurityPolicy#Aes128_Sha256_RsaOaep"
            }
            Self::Aes256Sha256RsaPss => {
                "http://opcfoundation.org/UA/SecurityPolicy#Aes256_Sha256_RsaPss"
            }
        }
    }
}

// =============================================================================
// Endpoint
// =============================================================================

/// A server address plus its security configuration.
///
/// An endpoint is cloned into the session at connect time and never changes
/// for the lifetime of that session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    /// `opc.tcp://host:port/path` URL.
    pub url: String,

    /// Message security mode.
    #[serde(default)]
    pub security_mode: SecurityMode,

    /// Security policy.
    #[serde(default)]
    pub security_policy: SecurityPolicy,
}

impl Endpoint {
    /// Default OPC UA TCP port.
    pub const DEFAULT_PORT: u16 = 4840;

    /// Creates an endpoint without security.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            security_mode: SecurityMode::None,
            security_policy: SecurityPolicy::None,
        }
    }

    /// Sets the security mode and policy.
    pub fn with_security(mut self, mode: SecurityMode, policy: SecurityPolicy) -> Self {
        self.security_mode = mode;
        self.security_policy = policy;
        self
    }

    /// Validates the URL and the security combination.
    pub fn validate(&self) -> ClientResult<()> {
        let rest = self.url.strip_prefix("opc.tcp://").ok_or_else(|| {
            ClientError::connection(ConnectionError::invalid_endpoint(
                &self.url,
                "Endpoint must start with opc.tcp://",
            ))
        })?;

        let authority = rest.split('/').next().unwrap_or_default();
        let (host, port) = split_authority(authority).ok_or_else(|| {
            ClientError::connection(ConnectionError::invalid_endpoint(
                &self.url,
                "Endpoint host is malformed",
            ))
        })?;
        if host.is_empty() {
            return Err(ClientError::connection(ConnectionError::invalid_endpoint(
                &self.url,
                "Endpoint has no host",
            )));
        }
        if let Some(port) = port {
            port.parse::<u16>().map_err(|_| {
                ClientError::connection(ConnectionError::invalid_endpoint(
                    &self.url,
                    "Endpoint port is not a number",
                ))
            })?;
        }

        if (self.security_mode == SecurityMode::None) != (self.security_policy == SecurityPolicy::None)
        {
            return Err(ClientError::connection(ConnectionError::invalid_endpoint(
                &self.url,
                "Security mode and policy must both be None or both be set",
            )));
        }

        Ok(())
    }

    /// Returns the port, defaulting to 4840.
    pub fn port(&self) -> u16 {
        self.url
            .strip_prefix("opc.tcp://")
            .and_then(|rest| rest.split('/').next())
            .and_then(split_authority)
            .and_then(|(_, port)| port)
            .and_then(|port| port.parse().ok())
            .unwrap_or(Self::DEFAULT_PORT)
    }
}

/// Splits `[user@]host[:port]` into host and port. IPv6 hosts must be
/// bracketed; `None` means the brackets are malformed.
fn split_authority(authority: &str) -> Option<(&str, Option<&str>)> {
    let host_port = authority.rsplit('@').next().unwrap_or_default();

    if let Some(bracketed) = host_port.strip_prefix('[') {
        let (host, tail) = bracketed.split_once(']')?;
        return match tail {
            "" => Some((host, None)),
            _ => tail.strip_prefix(':').map(|port| (host, Some(port))),
        };
    }

    match host_port.rsplit_once(':') {
        Some((host, port)) => Some((host, Some(port))),
        None => Some((host_port, None)),
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url)
    }
}

// =============================================================================
// Credentials
// =============================================================================

/// User identity presented when activating a session.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum Credentials {
    /// Anonymous authentication.
    #[default]
    Anonymous,

    /// Username and password authentication.
    UserName {
        /// The username.
        username: String,
        /// The password.
        password: String,
    },
}

impl Credentials {
    /// Creates username/password credentials.
    pub fn user_name(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self::UserName {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Returns `true` for anonymous credentials.
    pub fn is_anonymous(&self) -> bool {
        matches!(self, Self::Anonymous)
    }

    /// Returns the username, if any.
    pub fn username(&self) -> Option<&str> {
        match self {
            Self::Anonymous => None,
            Self::UserName { username, .. } => Some(username),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Anonymous => f.write_str("Anonymous"),
            Self::UserName { username, .. } => f
                .debug_struct("UserName")
                .field("username", username)
                .field("password", &"***")
                .finish(),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_id_parse_and_format() {
        let node: NodeId = "ns=2;s=TYPES!A!ANALOG_SIGNAL!XA01".parse().unwrap();
        assert_eq!(node.namespace_index, 2);
        assert_eq!(node.as_string(), Some("TYPES!A!ANALOG_SIGNAL!XA01"));
        assert_eq!(node.to_string(), "ns=2;s=TYPES!A!ANALOG_SIGNAL!XA01");

        let node: NodeId = "i=85".parse().unwrap();
        assert_eq!(node, NodeId::OBJECTS_FOLDER);
        assert_eq!(node.to_string(), "i=85");

        let guid = Uuid::new_v4();
        let node: NodeId = format!("ns=3;g={}", guid).parse().unwrap();
        assert_eq!(node, NodeId::guid(3, guid));

        let node: NodeId = "ns=1;b=AQID".parse().unwrap();
        assert_eq!(node, NodeId::opaque(1, vec![1, 2, 3]));
    }

    #[test]
    fn test_node_id_parse_errors() {
        assert!("ns=x;i=1".parse::<NodeId>().is_err());
        assert!("ns=2".parse::<NodeId>().is_err());
        assert!("ns=2;q=1".parse::<NodeId>().is_err());
        assert!("ns=2;s=".parse::<NodeId>().is_err());
        assert!("ns=2;i=abc".parse::<NodeId>().is_err());
    }

    #[test]
    fn test_node_id_as_map_key() {
        let mut map = std::collections::HashMap::new();
        map.insert(NodeId::string(2, "A"), 1);
        assert_eq!(map.get(&NodeId::new(2, "A")), Some(&1));
        assert_eq!(map.get(&NodeId::new(3, "A")), None);
    }

    #[test]
    fn test_identifier_path_builder() {
        let path = IdentifierPath::builder()
            .separator('!')
            .segments(["TYPES", "O", "OPC", "OPC_INI", "OPC_COMMAND"])
            .build()
            .unwrap();
        assert_eq!(path.to_identifier(), "TYPES!O!OPC!OPC_INI!OPC_COMMAND");
        assert_eq!(path.segments().len(), 5);

        let child = path.child("VALUE").unwrap();
        assert_eq!(child.to_identifier(), "TYPES!O!OPC!OPC_INI!OPC_COMMAND!VALUE");
        assert!(path.child("A!B").is_err());
    }

    #[test]
    fn test_identifier_path_validation() {
        assert!(IdentifierPath::builder().build().is_err());
        assert!(IdentifierPath::builder().segment("").build().is_err());
        assert!(IdentifierPath::builder()
            .separator('!')
            .segment("A!B")
            .build()
            .is_err());
        assert!(IdentifierPath::builder()
            .separator(' ')
            .segment("A")
            .build()
            .is_err());
        assert!(IdentifierPath::builder()
            .segment("line\nbreak")
            .build()
            .is_err());

        let path = IdentifierPath::builder().segment("Pump").segment("Speed").build().unwrap();
        assert_eq!(path.to_string(), "Pump.Speed");
    }

    #[test]
    fn test_qualified_name_parse() {
        let name: QualifiedName = "2:Simulation".parse().unwrap();
        assert_eq!(name, QualifiedName::new(2, "Simulation"));

        let name: QualifiedName = "Objects".parse().unwrap();
        assert_eq!(name.namespace_index, 0);

        let name: QualifiedName = "x:y".parse().unwrap();
        assert_eq!(name, QualifiedName::new(0, "x:y"));

        assert!("2:".parse::<QualifiedName>().is_err());
    }

    #[test]
    fn test_browse_path() {
        let path: BrowsePath = "0:Objects/2:Simulation/2:TYPES".parse().unwrap();
        assert_eq!(path.len(), 3);
        assert_eq!(path.segments()[1], QualifiedName::new(2, "Simulation"));
        assert_eq!(path.to_string(), "0:Objects/2:Simulation/2:TYPES");

        let built = BrowsePath::new()
            .segment(0, "Objects")
            .segment(2, "Simulation")
            .segment(2, "TYPES");
        assert_eq!(built, path);

        let from_list = BrowsePath::from_segments(["0:Objects", "2:Simulation", "2:TYPES"]).unwrap();
        assert_eq!(from_list, path);
    }

    #[test]
    fn test_node_class_monitoring_support() {
        assert!(NodeClass::Variable.supports(MonitorKind::DataChange));
        assert!(!NodeClass::Object.supports(MonitorKind::DataChange));
        assert!(NodeClass::Object.supports(MonitorKind::Event));
        assert!(!NodeClass::Method.supports(MonitorKind::Event));
        assert_eq!(NodeClass::from_value(2), Some(NodeClass::Variable));
        assert_eq!(NodeClass::from_value(3), None);
    }

    #[test]
    fn test_endpoint_validation() {
        assert!(Endpoint::new("opc.tcp://localhost:4842").validate().is_ok());
        assert!(Endpoint::new("opc.tcp://admin@localhost:4840/freeopcua/server/")
            .validate()
            .is_ok());
        assert!(Endpoint::new("http://localhost:4842").validate().is_err());
        assert!(Endpoint::new("opc.tcp://").validate().is_err());
        assert!(Endpoint::new("opc.tcp://host:port").validate().is_err());
        assert!(Endpoint::new("opc.tcp://:4840").validate().is_err());
        assert!(Endpoint::new("opc.tcp://host:4840")
            .with_security(SecurityMode::Sign, SecurityPolicy::None)
            .validate()
            .is_err());
        assert!(Endpoint::new("opc.tcp://host:4840")
            .with_security(SecurityMode::SignAndEncrypt, SecurityPolicy::Basic256Sha256)
            .validate()
            .is_ok());
    }

    #[test]
    fn test_endpoint_port() {
        assert_eq!(Endpoint::new("opc.tcp://localhost:4842").port(), 4842);
        assert_eq!(Endpoint::new("opc.tcp://localhost/path").port(), 4840);
        assert_eq!(Endpoint::new("opc.tcp://[::1]:4843/server").port(), 4843);
        assert_eq!(Endpoint::new("opc.tcp://[::1]").port(), 4840);
    }

    #[test]
    fn test_endpoint_ipv6_hosts() {
        assert!(Endpoint::new("opc.tcp://[::1]").validate().is_ok());
        assert!(Endpoint::new("opc.tcp://[fe80::1]:4840/path").validate().is_ok());
        assert!(Endpoint::new("opc.tcp://user@[::1]:4841").validate().is_ok());
        assert!(Endpoint::new("opc.tcp://[::1]:port").validate().is_err());
        assert!(Endpoint::new("opc.tcp://[::1").validate().is_err());
        assert!(Endpoint::new("opc.tcp://[::1]4840").validate().is_err());
        assert!(Endpoint::new("opc.tcp://[]:4840").validate().is_err());
    }

    #[test]
    fn test_credentials_debug_masks_password() {
        let creds = Credentials::user_name("admin", "secret");
        let debug = format!("{:?}", creds);
        assert!(debug.contains("admin"));
        assert!(!debug.contains("secret"));
        assert!(Credentials::default().is_anonymous());
    }

    #[test]
    fn test_security_mode_parse() {
        assert_eq!("sign_and_encrypt".parse::<SecurityMode>().unwrap(), SecurityMode::SignAndEncrypt);
        assert!("bogus".parse::<SecurityMode>().is_err());
    }
}
