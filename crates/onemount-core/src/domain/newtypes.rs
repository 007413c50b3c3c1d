//! Domain newtypes with validation
//!
//! This module provides strongly-typed wrappers for domain identifiers and values.
//! Each newtype ensures data validity at construction time.

use std::fmt::{self, Display, Formatter};
use std::hash::{Hash, Hasher};
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::errors::DomainError;

// ============================================================================
// UUID-based ID types
// ============================================================================

/// A generic unique identifier wrapper around UUID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UniqueId(Uuid);

impl UniqueId {
    /// Create a new random UniqueId
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a UniqueId from an existing UUID
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID value
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Create a nil (all zeros) UniqueId
    #[must_use]
    pub const fn nil() -> Self {
        Self(Uuid::nil())
    }
}

impl Default for UniqueId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for UniqueId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for UniqueId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| DomainError::InvalidId(format!("Invalid UUID: {e}")))
    }
}

impl From<Uuid> for UniqueId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Identifier for Account entities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(Uuid);

impl AccountId {
    /// Create a new random AccountId
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create an AccountId from an existing UUID
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID value
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Create a nil (all zeros) AccountId
    #[must_use]
    pub const fn nil() -> Self {
        Self(Uuid::nil())
    }
}

impl Default for AccountId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for AccountId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for AccountId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| DomainError::InvalidId(format!("Invalid AccountId: {e}")))
    }
}

impl From<Uuid> for AccountId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Correlates audit entries produced within the same sync cycle/run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Create a new random SessionId
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a SessionId from an existing UUID
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID value
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Create a nil (all zeros) SessionId
    #[must_use]
    pub const fn nil() -> Self {
        Self(Uuid::nil())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for SessionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SessionId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| DomainError::InvalidId(format!("Invalid SessionId: {e}")))
    }
}

impl From<Uuid> for SessionId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Identifier for Conflict entities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConflictId(Uuid);

impl ConflictId {
    /// Create a new random ConflictId
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a ConflictId from an existing UUID
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID value
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Create a nil (all zeros) ConflictId
    #[must_use]
    pub const fn nil() -> Self {
        Self(Uuid::nil())
    }
}

impl Default for ConflictId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for ConflictId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ConflictId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| DomainError::InvalidId(format!("Invalid ConflictId: {e}")))
    }
}

impl From<Uuid> for ConflictId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Identifier for audit log entries (database row ID)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuditId(i64);

impl AuditId {
    /// Create an AuditId from an i64 value
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Get the inner i64 value
    #[must_use]
    pub const fn as_i64(&self) -> i64 {
        self.0
    }
}

impl Display for AuditId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for AuditId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<i64>()
            .map(Self)
            .map_err(|e| DomainError::InvalidId(format!("Invalid AuditId: {e}")))
    }
}

impl From<i64> for AuditId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

// ============================================================================
// Path types
// ============================================================================

/// A validated absolute path within the sync root directory
///
/// SyncPath ensures the path is:
/// - Absolute (starts with /)
/// - Normalized (no . or .. components)
/// - Within the sync root when validated against one
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "PathBuf", into = "PathBuf")]
pub struct SyncPath(PathBuf);

impl SyncPath {
    /// Create a new SyncPath, validating it is absolute
    ///
    /// # Errors
    /// Returns `DomainError::InvalidPath` if the path is not absolute
    pub fn new(path: PathBuf) -> Result<Self, DomainError> {
        if !path.is_absolute() {
            return Err(DomainError::InvalidPath(format!(
                "Path must be absolute: {}",
                path.display()
            )));
        }

        // Normalize the path by converting to canonical form conceptually
        // We don't use fs::canonicalize() as the path might not exist yet
        let normalized = Self::normalize_path(&path)?;
        Ok(Self(normalized))
    }

    /// Create a SyncPath validated against a sync root
    ///
    /// # Errors
    /// Returns error if path is not within the sync root
    pub fn new_within_root(path: PathBuf, sync_root: &SyncPath) -> Result<Self, DomainError> {
        let sync_path = Self::new(path)?;

        if !sync_path.0.starts_with(&sync_root.0) {
            return Err(DomainError::PathNotInSyncRoot(format!(
                "{} is not within sync root {}",
                sync_path.0.display(),
                sync_root.0.display()
            )));
        }

        Ok(sync_path)
    }

    /// Get the inner PathBuf reference
    #[must_use]
    pub fn as_path(&self) -> &PathBuf {
        &self.0
    }

    /// Convert to owned PathBuf
    #[must_use]
    pub fn into_path_buf(self) -> PathBuf {
        self.0
    }

    /// Get the path relative to a root
    ///
    /// # Errors
    /// Returns error if this path is not within the root
    pub fn relative_to(&self, root: &SyncPath) -> Result<PathBuf, DomainError> {
        self.0
            .strip_prefix(&root.0)
            .map(|p| p.to_path_buf())
            .map_err(|_| {
                DomainError::PathNotInSyncRoot(format!(
                    "{} is not within {}",
                    self.0.display(),
                    root.0.display()
                ))
            })
    }

    /// Join a relative path to this SyncPath
    ///
    /// # Errors
    /// Returns error if the component contains invalid sequences
    pub fn join(&self, component: &str) -> Result<Self, DomainError> {
        // Prevent path traversal
        if component.contains("..") || component.starts_with('/') {
            return Err(DomainError::InvalidPath(format!(
                "Invalid path component: {component}"
            )));
        }

        let new_path = self.0.join(component);
        Self::new(new_path)
    }

    /// Normalize a path by resolving . and .. components
    fn normalize_path(path: &PathBuf) -> Result<PathBuf, DomainError> {
        use std::path::Component;

        let mut normalized = PathBuf::new();

        for component in path.components() {
            match component {
                Component::Prefix(p) => normalized.push(p.as_os_str()),
                Component::RootDir => normalized.push("/"),
                Component::CurDir => {}
                Component::ParentDir => {
                    if !normalized.pop() {
                        return Err(DomainError::InvalidPath(
                            "Path escapes root via ..".to_string(),
                        ));
                    }
                }
                Component::Normal(c) => normalized.push(c),
            }
        }

        Ok(normalized)
    }
}

impl Display for SyncPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

impl TryFrom<PathBuf> for SyncPath {
    type Error = DomainError;

    fn try_from(path: PathBuf) -> Result<Self, Self::Error> {
        Self::new(path)
    }
}

impl From<SyncPath> for PathBuf {
    fn from(sync_path: SyncPath) -> Self {
        sync_path.0
    }
}

impl AsRef<std::path::Path> for SyncPath {
    fn as_ref(&self) -> &std::path::Path {
        &self.0
    }
}

/// A OneDrive remote path (must start with /)
///
/// Represents paths in OneDrive format, e.g., "/Documents/file.txt"
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RemotePath(String);

impl RemotePath {
    /// Create a new RemotePath
    ///
    /// # Errors
    /// Returns error if path doesn't start with /
    pub fn new(path: String) -> Result<Self, DomainError> {
        if !path.starts_with('/') {
            return Err(DomainError::InvalidRemotePath(format!(
                "Remote path must start with '/': {path}"
            )));
        }

        // Validate no double slashes (except root)
        if path.len() > 1 && path.contains("//") {
            return Err(DomainError::InvalidRemotePath(format!(
                "Remote path contains invalid double slashes: {path}"
            )));
        }

        // Validate no path traversal
        if path.contains("..") {
            return Err(DomainError::InvalidRemotePath(format!(
                "Remote path contains invalid traversal: {path}"
            )));
        }

        Ok(Self(path))
    }

    /// Create the root path "/"
    #[must_use]
    pub fn root() -> Self {
        Self("/".to_string())
    }

    /// Get the inner string reference
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Join a path component
    ///
    /// # Errors
    /// Returns error if component is invalid
    pub fn join(&self, component: &str) -> Result<Self, DomainError> {
        if component.is_empty() || component.contains('/') || component.contains("..") {
            return Err(DomainError::InvalidRemotePath(format!(
                "Invalid path component: {component}"
            )));
        }

        let new_path = if self.0 == "/" {
            format!("/{component}")
        } else {
            format!("{}/{component}", self.0)
        };

        Self::new(new_path)
    }

    /// Get the parent path
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        if self.0 == "/" {
            return None;
        }

        match self.0.rfind('/') {
            Some(0) => Some(Self::root()),
            Some(idx) => Some(Self(self.0[..idx].to_string())),
            None => None,
        }
    }

    /// Get the file name component
    #[must_use]
    pub fn file_name(&self) -> Option<&str> {
        if self.0 == "/" {
            return None;
        }

        self.0.rsplit('/').next()
    }
}

impl Display for RemotePath {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RemotePath {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string())
    }
}

impl TryFrom<String> for RemotePath {
    type Error = DomainError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<RemotePath> for String {
    fn from(path: RemotePath) -> Self {
        path.0
    }
}

// ============================================================================
// OneDrive-specific types
// ============================================================================

/// OneDrive item ID (alphanumeric identifier)
///
/// Format: Alphanumeric string, typically like "01BYE5RZ6QN3ZWBTUFOFD3GSPGOHDJD36K"
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RemoteId(String);

impl RemoteId {
    /// Create a new RemoteId
    ///
    /// # Errors
    /// Returns error if the ID format is invalid
    pub fn new(id: String) -> Result<Self, DomainError> {
        if id.is_empty() {
            return Err(DomainError::InvalidRemoteId(
                "Remote ID cannot be empty".to_string(),
            ));
        }

        // OneDrive IDs are alphanumeric with possible special chars
        // They are typically base64-like or hex strings
        if !id
            .chars()
            .all(|c| c.is_alphanumeric() || c == '!' || c == '-' || c == '_')
        {
            return Err(DomainError::InvalidRemoteId(format!(
                "Remote ID contains invalid characters: {id}"
            )));
        }

        Ok(Self(id))
    }

    /// Get the inner string reference
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for RemoteId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RemoteId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string())
    }
}

impl TryFrom<String> for RemoteId {
    type Error = DomainError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<RemoteId> for String {
    fn from(id: RemoteId) -> Self {
        id.0
    }
}

/// OneDrive quickXorHash in Base64 format
///
/// This is the hash algorithm used by OneDrive for file integrity.
/// Format: Base64-encoded 20-byte hash
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FileHash(String);

impl FileHash {
    /// Expected decoded length of quickXorHash (20 bytes)
    const EXPECTED_DECODED_LEN: usize = 20;

    /// Create a new FileHash
    ///
    /// # Errors
    /// Returns error if the hash is not valid Base64 or wrong length
    pub fn new(hash: String) -> Result<Self, DomainError> {
        if hash.is_empty() {
            return Err(DomainError::InvalidHash("Hash cannot be empty".to_string()));
        }

        // Validate Base64 format
        // Base64 uses A-Z, a-z, 0-9, +, /, and = for padding
        if !hash
            .chars()
            .all(|c| c.is_alphanumeric() || c == '+' || c == '/' || c == '=')
        {
            return Err(DomainError::InvalidHash(format!(
                "Hash is not valid Base64: {hash}"
            )));
        }

        // Validate length (20 bytes in Base64 = ceil(20 * 4/3) = 28 chars with padding)
        // quickXorHash produces 20 bytes, which encodes to 28 Base64 characters
        let decoded_len = Self::base64_decoded_len(&hash);
        if decoded_len != Self::EXPECTED_DECODED_LEN {
            return Err(DomainError::InvalidHash(format!(
                "Hash has wrong length: expected {} bytes, got {} bytes",
                Self::EXPECTED_DECODED_LEN,
                decoded_len
            )));
        }

        Ok(Self(hash))
    }

    /// Get the inner string reference
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Calculate the decoded length of a Base64 string
    fn base64_decoded_len(s: &str) -> usize {
        let len = s.len();
        let padding = s.chars().rev().take_while(|&c| c == '=').count();
        (len * 3 / 4) - padding
    }
}

impl Display for FileHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for FileHash {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string())
    }
}

impl TryFrom<String> for FileHash {
    type Error = DomainError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<FileHash> for String {
    fn from(hash: FileHash) -> Self {
        hash.0
    }
}

/// Microsoft Graph delta token (opaque string)
///
/// Used for incremental synchronization with OneDrive.
/// The token is opaque - we don't validate its contents, only that it's non-empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DeltaToken(String);

impl DeltaToken {
    /// Create a new DeltaToken
    ///
    /// # Errors
    /// Returns error if the token is empty
    pub fn new(token: String) -> Result<Self, DomainError> {
        if token.is_empty() {
            return Err(DomainError::InvalidDeltaToken(
                "Delta token cannot be empty".to_string(),
            ));
        }

        // Delta tokens can contain various characters including URL-encoded parts
        // We do minimal validation since they're opaque
        Ok(Self(token))
    }

    /// Get the inner string reference
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for DeltaToken {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for DeltaToken {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string())
    }
}

impl TryFrom<String> for DeltaToken {
    type Error = DomainError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<DeltaToken> for String {
    fn from(token: DeltaToken) -> Self {
        token.0
    }
}

// ============================================================================
// Email type
// ============================================================================

/// Validated email address (RFC 5322 basic validation)
///
/// Performs basic structural validation:
/// - Contains exactly one @
/// - Has non-empty local part
/// - Has non-empty domain with at least one dot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Email(String);

impl Email {
    /// Create a new validated Email
    ///
    /// # Errors
    /// Returns error if the email format is invalid
    pub fn new(email: String) -> Result<Self, DomainError> {
        Self::validate(&email)?;
        // Store in lowercase for consistency
        Ok(Self(email.to_lowercase()))
    }

    /// Get the inner string reference
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Get the local part (before @)
    #[must_use]
    pub fn local_part(&self) -> &str {
        self.0.split('@').next().unwrap_or("")
    }

    /// Get the domain part (after @)
    #[must_use]
    pub fn domain(&self) -> &str {
        self.0.split('@').nth(1).unwrap_or("")
    }

    /// Validate email format
    fn validate(email: &str) -> Result<(), DomainError> {
        if email.is_empty() {
            return Err(DomainError::InvalidEmail(
                "Email cannot be empty".to_string(),
            ));
        }

        // Split by @
        let parts: Vec<&str> = email.split('@').collect();
        if parts.len() != 2 {
            return Err(DomainError::InvalidEmail(format!(
                "Email must contain exactly one '@': {email}"
            )));
        }

        let local = parts[0];
        let domain = parts[1];

        // Validate local part
        if local.is_empty() {
            return Err(DomainError::InvalidEmail(format!(
                "Email local part cannot be empty: {email}"
            )));
        }

        if local.len() > 64 {
            return Err(DomainError::InvalidEmail(format!(
                "Email local part too long (max 64 chars): {email}"
            )));
        }

        // Local part can contain alphanumeric, dots, hyphens, underscores, plus
        if !local
            .chars()
            .all(|c| c.is_alphanumeric() || ".+-_".contains(c))
        {
            return Err(DomainError::InvalidEmail(format!(
                "Email local part contains invalid characters: {email}"
            )));
        }

        // Validate domain
        if domain.is_empty() {
            return Err(DomainError::InvalidEmail(format!(
                "Email domain cannot be empty: {email}"
            )));
        }

        if domain.len() > 255 {
            return Err(DomainError::InvalidEmail(format!(
                "Email domain too long (max 255 chars): {email}"
            )));
        }

        // Domain must contain at least one dot
        if !domain.contains('.') {
            return Err(DomainError::InvalidEmail(format!(
                "Email domain must contain at least one dot: {email}"
            )));
        }

        // Domain can contain alphanumeric, dots, hyphens
        if !domain
            .chars()
            .all(|c| c.is_alphanumeric() || ".-".contains(c))
        {
            return Err(DomainError::InvalidEmail(format!(
                "Email domain contains invalid characters: {email}"
            )));
        }

        // Domain labels cannot start or end with hyphen
        for label in domain.split('.') {
            if label.is_empty() {
                return Err(DomainError::InvalidEmail(format!(
                    "Email domain contains empty label: {email}"
                )));
            }
            if label.starts_with('-') || label.ends_with('-') {
                return Err(DomainError::InvalidEmail(format!(
                    "Email domain label cannot start or end with hyphen: {email}"
                )));
            }
        }

        Ok(())
    }
}

impl Display for Email {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Email {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string())
    }
}

impl TryFrom<String> for Email {
    type Error = DomainError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<Email> for String {
    fn from(email: Email) -> Self {
        email.0
    }
}

// Custom Hash implementation for Email to ensure case-insensitive hashing
impl Hash for Email {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

// ============================================================================
// Inode identity types
// ============================================================================

/// The kernel-visible node number assigned to an inode.
///
/// Node 1 is reserved by FUSE for the mount root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(u64);

impl NodeId {
    /// The fixed node number of the mount root.
    pub const ROOT: NodeId = NodeId(1);

    /// Wrap a raw kernel node number.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw `u64` node number as seen by the kernel.
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    /// Returns true if this is the reserved mount-root node.
    #[must_use]
    pub const fn is_root(&self) -> bool {
        self.0 == 1
    }
}

impl Display for NodeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for NodeId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

/// Identity of an item as known to the system: either a stable identifier
/// assigned by the cloud, or a temporary one minted locally for an item
/// that has not yet been uploaded.
///
/// A `Local` id is never sent to the cloud provider; once an upload
/// completes, the item's identity is replaced with the `Remote` id the
/// cloud assigned and every reference to the old local id is rewritten.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ItemId {
    /// A stable id assigned by the cloud provider.
    Remote(RemoteId),
    /// A locally-minted placeholder id for an item not yet uploaded.
    ///
    /// Always carries the `local-` prefix so it can never collide with,
    /// or be mistaken for, a remote id.
    Local(String),
}

impl ItemId {
    /// Mints a new locally-unique placeholder id.
    #[must_use]
    pub fn new_local() -> Self {
        Self::Local(format!("local-{}", Uuid::new_v4()))
    }

    /// Wraps an existing remote id.
    #[must_use]
    pub fn from_remote(id: RemoteId) -> Self {
        Self::Remote(id)
    }

    /// Returns true if this id was minted locally and has no cloud counterpart yet.
    #[must_use]
    pub fn is_local(&self) -> bool {
        matches!(self, Self::Local(_))
    }

    /// Returns the wrapped `RemoteId` if this is a remote id.
    #[must_use]
    pub fn as_remote(&self) -> Option<&RemoteId> {
        match self {
            Self::Remote(id) => Some(id),
            Self::Local(_) => None,
        }
    }

    /// Returns the id as a plain string, for use as a map key or log field.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Remote(id) => id.as_str(),
            Self::Local(s) => s.as_str(),
        }
    }
}

impl Display for ItemId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<RemoteId> for ItemId {
    fn from(id: RemoteId) -> Self {
        Self::Remote(id)
    }
}

// ============================================================================
// Tests
// ============================================================================
