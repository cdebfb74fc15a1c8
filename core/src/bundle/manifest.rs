//! Manifest builder and verifier
//!
//! ```text
//! manifestHash = BLAKE3(canonical_json(manifest - {manifestHash, signature}))
//! signature    = Ed25519_Sign(deployer_secret, manifestHash)
//! ```
//!
//! Canonical JSON has object keys sorted at every level and no whitespace.
//! `serde_json::Value` keeps keys in a `BTreeMap`, so round-tripping through
//! it gives the sorted form regardless of struct field order.

use std::collections::HashSet;

use tracing::debug;

use super::error::{BundleError, IntegrityError};
use super::hasher::{self, ChunkPayload};
use super::types::{CacheStrategy, ContentHash, FileEntry, Manifest, Permission};
use crate::data::clock::Clock;
use crate::naming::codec::{self, is_name_form};
use crate::security::create_key_pair::KeyPair;
use crate::security::sign::{sign_digest, verify_digest};

/// Default freshness window for cached copies (7 days)
pub const DEFAULT_CACHE_DURATION_MS: u64 = 7 * 24 * 60 * 60 * 1000;

/// Maximum length of an explicit app ID
pub const MAX_APP_ID_LEN: usize = 128;

/// Preferred entry point
const INDEX_FILE: &str = "index.html";

/// A raw file handed to the builder
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub path: String,
    pub bytes: Vec<u8>,
}

impl SourceFile {
    pub fn new(path: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            path: path.into(),
            bytes: bytes.into(),
        }
    }
}

/// Metadata for a new deployment
#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// Explicit app ID; derived from `name` when absent
    pub app_id: Option<String>,
    pub name: String,
    pub version: u32,
    pub description: String,
    pub author: String,
    pub permissions: Vec<Permission>,
    pub cache_strategy: CacheStrategy,
    pub cache_duration_ms: u64,
}

impl BuildOptions {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            app_id: None,
            name: name.into(),
            version: 1,
            description: String::new(),
            author: String::new(),
            permissions: Vec::new(),
            cache_strategy: CacheStrategy::default(),
            cache_duration_ms: DEFAULT_CACHE_DURATION_MS,
        }
    }

    pub fn with_app_id(mut self, app_id: impl Into<String>) -> Self {
        self.app_id = Some(app_id.into());
        self
    }

    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = author.into();
        self
    }

    pub fn with_permission(mut self, permission: Permission) -> Self {
        if !self.permissions.contains(&permission) {
            self.permissions.push(permission);
        }
        self
    }

    pub fn with_cache_strategy(mut self, strategy: CacheStrategy) -> Self {
        self.cache_strategy = strategy;
        self
    }

    pub fn with_cache_duration_ms(mut self, millis: u64) -> Self {
        self.cache_duration_ms = millis;
        self
    }
}

/// A signed manifest plus the chunk bytes its large files reference
#[derive(Debug, Clone)]
pub struct BuildOutput {
    pub manifest: Manifest,
    pub chunks: Vec<ChunkPayload>,
}

/// Strip a leading `./` and reject paths that could escape the bundle
pub fn normalize_path(raw: &str) -> Result<String, BundleError> {
    let mut path = raw;
    while let Some(rest) = path.strip_prefix("./") {
        path = rest;
    }

    let unsafe_path = path.is_empty()
        || path.starts_with('/')
        || path.contains('\\')
        || path
            .split('/')
            .any(|segment| segment.is_empty() || segment == "." || segment == "..");

    if unsafe_path {
        return Err(BundleError::InvalidPath(raw.to_string()));
    }
    Ok(path.to_string())
}

/// Check an explicit app ID.
///
/// It must not collide with the short-name form, otherwise an address could
/// not tell it apart from a name.
pub fn validate_app_id(app_id: &str) -> Result<(), BundleError> {
    let well_formed = !app_id.is_empty()
        && app_id.len() <= MAX_APP_ID_LEN
        && app_id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');

    if !well_formed || is_name_form(app_id) {
        return Err(BundleError::InvalidAppId(app_id.to_string()));
    }
    Ok(())
}

fn select_entry_point(files: &[FileEntry]) -> Option<String> {
    if files.iter().any(|f| f.path == INDEX_FILE) {
        return Some(INDEX_FILE.to_string());
    }
    files
        .iter()
        .map(|f| f.path.as_str())
        .filter(|path| path.ends_with(".html"))
        .min()
        .map(str::to_string)
}

/// Build and sign a manifest from raw files
pub fn build(
    files: Vec<SourceFile>,
    options: &BuildOptions,
    key_pair: &KeyPair,
    clock: &dyn Clock,
) -> Result<BuildOutput, BundleError> {
    if files.is_empty() {
        return Err(BundleError::Empty);
    }

    let app_id = match &options.app_id {
        Some(id) => {
            validate_app_id(id)?;
            id.clone()
        }
        None => codec::encode(&codec::strict_name(&options.name)?)?,
    };

    let mut normalized = Vec::with_capacity(files.len());
    let mut seen = HashSet::new();
    for file in files {
        let path = normalize_path(&file.path)?;
        if !seen.insert(path.clone()) {
            return Err(BundleError::DuplicatePath(path));
        }
        normalized.push((path, file.bytes));
    }

    let mut entries = Vec::with_capacity(normalized.len());
    let mut chunks = Vec::new();
    for (path, bytes) in &normalized {
        let (entry, payloads) = hasher::file_entry(path, bytes);
        entries.push(entry);
        chunks.extend(payloads);
    }

    let entry_point = select_entry_point(&entries).ok_or(BundleError::NoEntryPoint)?;

    let mut permissions = options.permissions.clone();
    permissions.sort();
    permissions.dedup();

    let mut manifest = Manifest {
        app_id,
        version: options.version,
        name: options.name.clone(),
        description: options.description.clone(),
        author: options.author.clone(),
        entry_point,
        files: entries,
        permissions,
        cache_strategy: options.cache_strategy,
        cache_duration: options.cache_duration_ms,
        deployed_at: clock.now_millis(),
        deployed_by: key_pair.public_key,
        manifest_hash: ContentHash([0u8; 32]),
        signature: [0u8; 64],
    };

    manifest.manifest_hash = compute_manifest_hash(&manifest)?;
    manifest.signature = sign_digest(&key_pair.private_key, &manifest.manifest_hash);

    debug!(
        app_id = %manifest.app_id,
        version = manifest.version,
        files = manifest.files.len(),
        chunks = chunks.len(),
        hash = %manifest.manifest_hash.short(),
        "built manifest"
    );

    Ok(BuildOutput { manifest, chunks })
}

/// Canonical JSON bytes covered by the manifest hash
pub fn canonical_bytes(manifest: &Manifest) -> serde_json::Result<Vec<u8>> {
    let mut value = serde_json::to_value(manifest)?;
    if let Some(object) = value.as_object_mut() {
        object.remove("manifestHash");
        object.remove("signature");
    }
    serde_json::to_vec(&value)
}

/// Hash of the manifest's canonical form
pub fn compute_manifest_hash(manifest: &Manifest) -> serde_json::Result<ContentHash> {
    Ok(hasher::hash(&canonical_bytes(manifest)?))
}

/// Structural checks that do not need any file bytes
fn check_structure(manifest: &Manifest) -> Result<(), IntegrityError> {
    if manifest.files.is_empty() {
        return Err(IntegrityError::Malformed("no files".to_string()));
    }
    if manifest.file(&manifest.entry_point).is_none() {
        return Err(IntegrityError::Malformed(format!(
            "entry point {} is not in the bundle",
            manifest.entry_point
        )));
    }

    for file in &manifest.files {
        match (&file.content, &file.chunks) {
            (Some(content), None) => {
                if content.len() as u64 != file.size {
                    return Err(IntegrityError::Malformed(format!(
                        "inline size mismatch: {}",
                        file.path
                    )));
                }
            }
            (None, Some(chunks)) => {
                let total: u64 = chunks.iter().map(|c| c.size).sum();
                let indexed = chunks
                    .iter()
                    .enumerate()
                    .all(|(i, c)| c.index as usize == i);
                if total != file.size || !indexed {
                    return Err(IntegrityError::Malformed(format!(
                        "chunk list inconsistent: {}",
                        file.path
                    )));
                }
            }
            _ => {
                return Err(IntegrityError::Malformed(format!(
                    "file must be either inline or chunked: {}",
                    file.path
                )))
            }
        }
    }
    Ok(())
}

/// Full manifest verification: structure, recomputed hash, then signature
pub fn verify(manifest: &Manifest) -> Result<(), IntegrityError> {
    check_structure(manifest)?;

    let computed = compute_manifest_hash(manifest)
        .map_err(|e| IntegrityError::Malformed(e.to_string()))?;
    if computed != manifest.manifest_hash {
        return Err(IntegrityError::ManifestHash {
            declared: manifest.manifest_hash.to_hex(),
            computed: computed.to_hex(),
        });
    }

    if !verify_digest(&manifest.deployed_by, &manifest.manifest_hash, &manifest.signature) {
        return Err(IntegrityError::Signature);
    }

    // inline content is covered by the signature but still has to match its hash
    for file in &manifest.files {
        if let Some(content) = &file.content {
            if !hasher::verify_file(file, content) {
                return Err(IntegrityError::FileHash {
                    path: file.path.clone(),
                });
            }
        }
    }
    Ok(())
}

/// Boolean form of [`verify`]
pub fn is_valid(manifest: &Manifest) -> bool {
    verify(manifest).is_ok()
}
