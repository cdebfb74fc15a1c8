//! Manifest data model
//!
//! Field names and nesting are the JSON wire contract between deploy-time and
//! load-time components (camelCase keys). Hashes, keys and signatures travel
//! as lowercase hex; inline file content travels as base64.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// BLAKE3-256 content digest
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(#[serde(with = "hex_array")] pub [u8; 32]);

impl ContentHash {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let mut out = [0u8; 32];
        hex::decode_to_slice(s, &mut out)?;
        Ok(Self(out))
    }

    /// First 8 hex characters, for logs
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", self.short())
    }
}

/// Capability a bundle may request from the bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    /// Read and write per-app state
    Storage,
    /// Publish state updates to peers and receive theirs
    Broadcast,
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Permission::Storage => f.write_str("storage"),
            Permission::Broadcast => f.write_str("broadcast"),
        }
    }
}

impl FromStr for Permission {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "storage" => Ok(Permission::Storage),
            "broadcast" => Ok(Permission::Broadcast),
            other => Err(format!("unknown permission: {}", other)),
        }
    }
}

/// How the loader treats a fresh cached copy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CacheStrategy {
    /// Serve the cached copy while it is fresh
    #[default]
    CacheFirst,
    /// Ask peers for a newer version first, fall back to the cache
    NetworkFirst,
}

/// One fixed-size slice of a large file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkInfo {
    pub index: u32,
    pub hash: ContentHash,
    pub size: u64,
}

/// A file in the bundle
///
/// Exactly one of `content` (small files) and `chunks` (large files) is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
    pub path: String,
    pub size: u64,
    pub mime_type: String,
    pub hash: ContentHash,
    #[serde(default, with = "base64_opt")]
    pub content: Option<Vec<u8>>,
    #[serde(default)]
    pub chunks: Option<Vec<ChunkInfo>>,
}

impl FileEntry {
    pub fn is_inline(&self) -> bool {
        self.content.is_some()
    }

    /// Chunk list, empty for inline files
    pub fn chunk_list(&self) -> &[ChunkInfo] {
        self.chunks.as_deref().unwrap_or(&[])
    }
}

/// Signed descriptor of a deployable bundle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub app_id: String,
    pub version: u32,
    pub name: String,
    pub description: String,
    pub author: String,
    pub entry_point: String,
    pub files: Vec<FileEntry>,
    pub permissions: Vec<Permission>,
    pub cache_strategy: CacheStrategy,
    /// Milliseconds a cached copy stays fresh
    pub cache_duration: u64,
    /// Unix milliseconds
    pub deployed_at: i64,
    /// Deployer's Ed25519 public key
    #[serde(with = "hex_array")]
    pub deployed_by: [u8; 32],
    pub manifest_hash: ContentHash,
    #[serde(with = "hex_array")]
    pub signature: [u8; 64],
}

impl Manifest {
    pub fn file(&self, path: &str) -> Option<&FileEntry> {
        self.files.iter().find(|f| f.path == path)
    }

    pub fn has_permission(&self, permission: Permission) -> bool {
        self.permissions.contains(&permission)
    }

    /// Every chunk referenced by the manifest, in file then index order
    pub fn chunk_infos(&self) -> impl Iterator<Item = &ChunkInfo> {
        self.files.iter().flat_map(|f| f.chunk_list().iter())
    }

    pub fn deployer_address(&self) -> String {
        hex::encode(self.deployed_by)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

/// Fixed-size byte arrays as lowercase hex strings
pub mod hex_array {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer, const N: usize>(
        bytes: &[u8; N],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>, const N: usize>(
        deserializer: D,
    ) -> Result<[u8; N], D::Error> {
        let s = String::deserialize(deserializer)?;
        let mut out = [0u8; N];
        hex::decode_to_slice(&s, &mut out).map_err(D::Error::custom)?;
        Ok(out)
    }
}

/// Optional byte buffers as base64 strings
mod base64_opt {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        bytes: &Option<Vec<u8>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(b) => serializer.serialize_some(&STANDARD.encode(b)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Vec<u8>>, D::Error> {
        let encoded: Option<String> = Option::deserialize(deserializer)?;
        encoded
            .map(|s| STANDARD.decode(s).map_err(D::Error::custom))
            .transpose()
    }
}
