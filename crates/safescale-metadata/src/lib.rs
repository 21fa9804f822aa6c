//! Metadata store (component C4): versioned, per-resource-locked rows over
//! a [`BlobStore`](safescale_blobstore::BlobStore).
//!
//! Grounded in `claw_persist::JsonStore` (load into a map, snapshot to disk
//! on every write) and the `ApiKeyStore` / `ConfigStore` / `SecretStore`
//! pattern of guarding a `HashMap` with CRUD methods plus a `snapshot()`
//! call after mutation — generalized here into a per-`ResourceKind` store
//! with `parking_lot::RwLock` row locks and a `(module, version)`-keyed
//! property registry. The teacher has no property-versioning precedent;
//! that piece is built from the spec description, keeping the teacher's
//! choice of locking primitive.
//!
//! A row is `(kind, id, properties)`; `properties` maps a module name to a
//! versioned, self-describing JSON payload. Locking is reentrant for reads
//! and exclusive for writes at the row level, with property access nested
//! inside it — callers never hold a property lock without the row lock.

#![forbid(unsafe_code)]

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use safescale_blobstore::BlobStore;
use safescale_error::{Result, SafeScaleError};
use safescale_types::{Ref, ResourceKind};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// One versioned property payload: `module` is the logical property name
/// (e.g. `"sizing"`, `"networking"`), `version` its schema generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PropertyEntry {
    version: u32,
    payload: serde_json::Value,
}

/// The persisted shape of a single resource row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataRow {
    pub kind: ResourceKind,
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    properties: BTreeMap<String, PropertyEntry>,
}

impl MetadataRow {
    fn new(kind: ResourceKind, id: impl Into<String>, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            kind,
            id: id.into(),
            name: name.into(),
            created_at: now,
            updated_at: now,
            properties: BTreeMap::new(),
        }
    }

    /// Deserialize `module`'s payload, creating it with the registry's zero
    /// value first if it's missing.
    fn property<T: DeserializeOwned + Serialize>(
        &mut self,
        module: &str,
        registry: &PropertyRegistry,
    ) -> Result<T> {
        if !self.properties.contains_key(module) {
            let (version, zero) = registry.zero(module)?;
            self.properties.insert(
                module.to_string(),
                PropertyEntry { version, payload: zero },
            );
        } else {
            self.upgrade_property(module, registry)?;
        }
        let entry = self.properties.get(module).expect("just inserted");
        serde_json::from_value(entry.payload.clone()).map_err(|e| {
            SafeScaleError::inconsistent(format!("property {module} failed to decode: {e}"))
        })
    }

    fn set_property<T: Serialize>(
        &mut self,
        module: &str,
        registry: &PropertyRegistry,
        value: &T,
    ) -> Result<()> {
        let version = registry.current_version(module).unwrap_or(1);
        self.set_property_versioned(module, version, value)
    }

    /// Write `value` tagged at an explicit schema `version`, bypassing the
    /// registry's "current" lookup. `carry` uses this: the caller is
    /// providing a value of a specific generation, which may predate the
    /// registry's latest-known version until an upgrade runs.
    fn set_property_versioned<T: Serialize>(
        &mut self,
        module: &str,
        version: u32,
        value: &T,
    ) -> Result<()> {
        let payload = serde_json::to_value(value).map_err(|e| {
            SafeScaleError::inconsistent(format!("property {module} failed to encode: {e}"))
        })?;
        self.properties
            .insert(module.to_string(), PropertyEntry { version, payload });
        Ok(())
    }

    /// The prior-version record's storage key once it's been superseded:
    /// kept under a version-qualified key, distinct from the canonical
    /// `module` key, so it stays readable until explicitly garbage
    /// collected (spec §4.4) rather than being discarded on upgrade.
    fn legacy_property_key(module: &str, version: u32) -> String {
        format!("{module}@v{version}")
    }

    /// The canonical `module` key always holds the latest version after an
    /// upgrade; the pre-upgrade record is preserved under
    /// [`Self::legacy_property_key`] rather than overwritten, matching the
    /// declarative V1->V2 rule in spec §4.4.
    fn upgrade_property(&mut self, module: &str, registry: &PropertyRegistry) -> Result<()> {
        let current = self.properties.get(module).expect("checked by caller").clone();
        if let Some(latest) = registry.current_version(module) {
            if current.version < latest {
                if let Some(upgraded) = registry.upgrade(module, current.version, &current.payload) {
                    debug!(module, from = current.version, to = latest, "upgrading property");
                    self.properties
                        .entry(Self::legacy_property_key(module, current.version))
                        .or_insert_with(|| current.clone());
                    self.properties.insert(
                        module.to_string(),
                        PropertyEntry { version: latest, payload: upgraded },
                    );
                }
            }
        }
        Ok(())
    }

    /// Discards any preserved pre-upgrade records for `module` (spec §4.4:
    /// "until explicitly garbage-collected"). The canonical, current-version
    /// entry under `module` is untouched.
    pub fn garbage_collect_legacy_properties(&mut self, module: &str) {
        let prefix = format!("{module}@v");
        self.properties.retain(|key, _| !key.starts_with(&prefix));
    }
}

/// Provides zero values and upgrade transitions for `(module, version)`
/// property payloads (spec §4.4). Registered once at store construction.
#[derive(Default)]
pub struct PropertyRegistry {
    zeros: BTreeMap<(String, u32), serde_json::Value>,
    current: BTreeMap<String, u32>,
    upgrades: BTreeMap<(String, u32), Arc<dyn Fn(&serde_json::Value) -> serde_json::Value + Send + Sync>>,
}

impl PropertyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the zero value for `(module, version)`. The highest
    /// registered version for a module becomes its "current" version.
    pub fn register_zero<T: Serialize>(&mut self, module: &str, version: u32, zero: &T) {
        let value = serde_json::to_value(zero).expect("zero value must serialize");
        self.zeros.insert((module.to_string(), version), value);
        let highest = self.current.entry(module.to_string()).or_insert(version);
        if version > *highest {
            *highest = version;
        }
    }

    /// Register a declarative `from_version -> to_version` populate
    /// function. `to_version` must already have a registered zero (it's
    /// the schema target, not literally used as output, but keeps the
    /// registry honest about what versions exist).
    pub fn register_upgrade<F>(&mut self, module: &str, from_version: u32, populate: F)
    where
        F: Fn(&serde_json::Value) -> serde_json::Value + Send + Sync + 'static,
    {
        self.upgrades
            .insert((module.to_string(), from_version), Arc::new(populate));
    }

    fn zero(&self, module: &str) -> Result<(u32, serde_json::Value)> {
        let version = self.current_version(module).ok_or_else(|| {
            SafeScaleError::inconsistent(format!("no property registered for module {module}"))
        })?;
        let value = self
            .zeros
            .get(&(module.to_string(), version))
            .cloned()
            .unwrap_or(serde_json::Value::Null);
        Ok((version, value))
    }

    fn current_version(&self, module: &str) -> Option<u32> {
        self.current.get(module).copied()
    }

    fn upgrade(&self, module: &str, from_version: u32, payload: &serde_json::Value) -> Option<serde_json::Value> {
        self.upgrades
            .get(&(module.to_string(), from_version))
            .map(|populate| populate(payload))
    }
}

/// Whether a closure passed to [`MetadataCore::alter`] actually changed the
/// row. `NoChange` skips the persist-and-snapshot step entirely.
pub enum AlterOutcome<R> {
    Changed(R),
    NoChange(R),
}

/// Per-`ResourceKind` store: an in-memory row cache over a [`BlobStore`],
/// guarded so every row has at most one `Arc<RwLock<MetadataRow>>`.
pub struct MetadataCore {
    kind: ResourceKind,
    blobs: Arc<dyn BlobStore>,
    registry: Arc<PropertyRegistry>,
    rows: RwLock<BTreeMap<String, Arc<RwLock<MetadataRow>>>>,
    names: RwLock<BTreeMap<String, String>>,
}

impl MetadataCore {
    pub fn new(kind: ResourceKind, blobs: Arc<dyn BlobStore>, registry: Arc<PropertyRegistry>) -> Self {
        Self {
            kind,
            blobs,
            registry,
            rows: RwLock::new(BTreeMap::new()),
            names: RwLock::new(BTreeMap::new()),
        }
    }

    fn bucket(&self) -> &'static str {
        self.kind.folder()
    }

    /// Bucket the name->id index is persisted under, separate from the row
    /// bucket so `blobs.list` over rows never trips over it.
    fn index_bucket(&self) -> String {
        format!("{}-index", self.bucket())
    }

    fn persist_name_index(&self) -> Result<()> {
        let snapshot = self.names.read().clone();
        let bytes = serde_json::to_vec(&snapshot)
            .map_err(|e| SafeScaleError::inconsistent(format!("name index failed to encode: {e}")))?;
        self.blobs.write(&self.index_bucket(), "index", &bytes)
    }

    /// Pull the persisted name index into the in-memory cache. Used when a
    /// `Ref::Name` lookup misses the cache, e.g. right after process start.
    fn reload_name_index(&self) {
        if let Ok(bytes) = self.blobs.read(&self.index_bucket(), "index") {
            if let Ok(index) = serde_json::from_slice::<BTreeMap<String, String>>(&bytes) {
                self.names.write().extend(index);
            }
        }
    }

    fn resolve_id(&self, r: &Ref) -> Result<String> {
        match r {
            Ref::Id(id) => Ok(id.clone()),
            Ref::Name(name) => {
                if let Some(id) = self.names.read().get(name).cloned() {
                    return Ok(id);
                }
                self.reload_name_index();
                self.names
                    .read()
                    .get(name)
                    .cloned()
                    .ok_or_else(|| SafeScaleError::not_found(format!("{} named {name}", self.bucket())))
            }
        }
    }

    fn load_from_blobs(&self, id: &str) -> Result<MetadataRow> {
        let bytes = self.blobs.read(self.bucket(), id)?;
        serde_json::from_slice(&bytes)
            .map_err(|e| SafeScaleError::inconsistent(format!("row {id} corrupt: {e}")))
    }

    fn persist(&self, row: &MetadataRow) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(row)
            .map_err(|e| SafeScaleError::inconsistent(format!("row {} failed to encode: {e}", row.id)))?;
        self.blobs.write(self.bucket(), &row.id, &bytes)
    }

    /// Associate a freshly created row with `id`/`name`, set `module`'s
    /// initial property (tagged at `version`) from `value`, persist, and
    /// cache it.
    pub fn carry<T: Serialize>(
        &self,
        id: impl Into<String>,
        name: impl Into<String>,
        module: &str,
        version: u32,
        value: &T,
    ) -> Result<()> {
        let id = id.into();
        let name = name.into();
        if self.rows.read().contains_key(&id) {
            return Err(SafeScaleError::duplicate(format!("{} {id} already carried", self.bucket())));
        }
        let mut row = MetadataRow::new(self.kind, id.clone(), name.clone());
        row.set_property_versioned(module, version, value)?;
        self.persist(&row)?;
        self.rows.write().insert(id.clone(), Arc::new(RwLock::new(row)));
        self.names.write().insert(name, id);
        self.persist_name_index()
    }

    fn row_handle(&self, r: &Ref) -> Result<Arc<RwLock<MetadataRow>>> {
        let id = self.resolve_id(r)?;
        if let Some(handle) = self.rows.read().get(&id) {
            return Ok(handle.clone());
        }
        let row = self.load_from_blobs(&id)?;
        let handle = Arc::new(RwLock::new(row));
        self.rows.write().insert(id.clone(), handle.clone());
        self.names.write().entry(handle.read().name.clone()).or_insert(id);
        Ok(handle)
    }

    /// Load a row by id or name. Idempotent; fails `NotFound`.
    pub fn read(&self, r: &Ref) -> Result<MetadataRow> {
        let handle = self.row_handle(r)?;
        Ok(handle.read().clone())
    }

    /// Re-read the row from the blob store, discarding the in-memory copy,
    /// and upgrade any stale property versions in the process.
    pub fn reload(&self, r: &Ref) -> Result<MetadataRow> {
        let id = self.resolve_id(r)?;
        let mut row = self.load_from_blobs(&id)?;
        for module in row.properties.keys().cloned().collect::<Vec<_>>() {
            row.upgrade_property(&module, &self.registry)?;
        }
        let handle = Arc::new(RwLock::new(row.clone()));
        self.rows.write().insert(id, handle);
        Ok(row)
    }

    /// Shared-lock access: `f` receives a clone of `module`'s payload;
    /// mutations `f` makes are never written back.
    pub fn inspect<T, R>(&self, r: &Ref, module: &str, f: impl FnOnce(&T) -> R) -> Result<R>
    where
        T: Serialize + DeserializeOwned,
    {
        let handle = self.row_handle(r)?;
        let guard = handle.read();
        let mut row_clone = guard.clone();
        drop(guard);
        let value: T = row_clone.property(module, &self.registry)?;
        Ok(f(&value))
    }

    /// Exclusive-lock access: `f` may mutate `module`'s payload; the row is
    /// persisted only if `f` reports [`AlterOutcome::Changed`].
    pub fn alter<T, R>(
        &self,
        r: &Ref,
        module: &str,
        f: impl FnOnce(&mut T) -> Result<AlterOutcome<R>>,
    ) -> Result<R>
    where
        T: Serialize + DeserializeOwned,
    {
        let handle = self.row_handle(r)?;
        let mut guard = handle.write();
        let mut value: T = guard.property(module, &self.registry)?;
        match f(&mut value) {
            Ok(AlterOutcome::Changed(r)) => {
                guard.set_property(module, &self.registry, &value)?;
                guard.updated_at = Utc::now();
                self.persist(&guard)?;
                Ok(r)
            }
            Ok(AlterOutcome::NoChange(r)) => Ok(r),
            Err(e) => Err(e),
        }
    }

    /// Discards any preserved pre-upgrade records for `module` on this row
    /// (spec §4.4: "preserved ... until explicitly garbage-collected"). The
    /// canonical current-version entry is untouched.
    pub fn garbage_collect_legacy_properties(&self, r: &Ref, module: &str) -> Result<()> {
        let handle = self.row_handle(r)?;
        let mut guard = handle.write();
        guard.garbage_collect_legacy_properties(module);
        guard.updated_at = Utc::now();
        self.persist(&guard)
    }

    /// Iterate every row of this kind present on the blob store, invoking
    /// `cb` with each row's snapshot.
    pub fn browse(&self, cb: &mut dyn FnMut(&MetadataRow) -> Result<()>) -> Result<()> {
        let mut decode_err = None;
        self.blobs.list(self.bucket(), "", &mut |id| {
            let row = match self.load_from_blobs(id) {
                Ok(row) => row,
                Err(e) => {
                    decode_err = Some(e.clone());
                    return Ok(());
                }
            };
            cb(&row)
        })?;
        if let Some(e) = decode_err {
            warn!(error = %e, "browse skipped a corrupt row");
        }
        Ok(())
    }

    /// Remove the row. `NotFound` is treated as success (idempotent).
    pub fn delete(&self, r: &Ref) -> Result<()> {
        let id = match self.resolve_id(r) {
            Ok(id) => id,
            Err(e) if e.kind == safescale_error::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e),
        };
        let removed_name = self.rows.write().remove(&id).map(|handle| handle.read().name.clone());
        if let Some(name) = removed_name {
            self.names.write().remove(&name);
            self.persist_name_index()?;
        }
        self.blobs.delete(self.bucket(), &id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use safescale_blobstore::InMemoryBlobStore;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
    struct SizingV1 {
        cpu: u32,
        ram_mib: u64,
    }

    #[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
    struct SizingV2 {
        cpu: u32,
        ram_mib: u64,
        gpu: u32,
    }

    fn store() -> MetadataCore {
        let mut registry = PropertyRegistry::new();
        registry.register_zero("sizing", 1, &SizingV1::default());
        MetadataCore::new(ResourceKind::Host, Arc::new(InMemoryBlobStore::new()), Arc::new(registry))
    }

    #[test]
    fn carry_then_read_round_trips() {
        let core = store();
        core.carry("id-1", "web-1", "sizing", 1, &SizingV1 { cpu: 2, ram_mib: 2048 }).unwrap();
        let row = core.read(&Ref::Id("id-1".into())).unwrap();
        assert_eq!(row.name, "web-1");
    }

    #[test]
    fn read_resolves_by_name_too() {
        let core = store();
        core.carry("id-1", "web-1", "sizing", 1, &SizingV1 { cpu: 2, ram_mib: 2048 }).unwrap();
        let row = core.read(&Ref::Name("web-1".into())).unwrap();
        assert_eq!(row.id, "id-1");
    }

    #[test]
    fn read_missing_is_not_found() {
        let core = store();
        let err = core.read(&Ref::Id("ghost".into())).unwrap_err();
        assert_eq!(err.kind, safescale_error::ErrorKind::NotFound);
    }

    #[test]
    fn carry_duplicate_id_is_rejected() {
        let core = store();
        core.carry("id-1", "web-1", "sizing", 1, &SizingV1::default()).unwrap();
        let err = core.carry("id-1", "web-2", "sizing", 1, &SizingV1::default()).unwrap_err();
        assert_eq!(err.kind, safescale_error::ErrorKind::Duplicate);
    }

    #[test]
    fn inspect_changes_are_discarded() {
        let core = store();
        core.carry("id-1", "web-1", "sizing", 1, &SizingV1 { cpu: 2, ram_mib: 2048 }).unwrap();
        core.inspect::<SizingV1, ()>(&Ref::Id("id-1".into()), "sizing", |_v| {}).unwrap();
        let row = core.read(&Ref::Id("id-1".into())).unwrap();
        let sizing: SizingV1 = core
            .inspect(&Ref::Id("id-1".into()), "sizing", |v: &SizingV1| v.clone())
            .unwrap();
        assert_eq!(sizing.cpu, 2);
        let _ = row;
    }

    #[test]
    fn alter_persists_only_on_changed() {
        let core = store();
        core.carry("id-1", "web-1", "sizing", 1, &SizingV1 { cpu: 2, ram_mib: 2048 }).unwrap();

        core.alter(&Ref::Id("id-1".into()), "sizing", |v: &mut SizingV1| {
            v.cpu = 4;
            Ok(AlterOutcome::Changed(()))
        })
        .unwrap();
        let sizing: SizingV1 = core.inspect(&Ref::Id("id-1".into()), "sizing", |v: &SizingV1| v.clone()).unwrap();
        assert_eq!(sizing.cpu, 4);

        core.alter(&Ref::Id("id-1".into()), "sizing", |v: &mut SizingV1| {
            v.cpu = 99;
            Ok(AlterOutcome::NoChange(()))
        })
        .unwrap();
        let sizing: SizingV1 = core.inspect(&Ref::Id("id-1".into()), "sizing", |v: &SizingV1| v.clone()).unwrap();
        assert_eq!(sizing.cpu, 4, "NoChange must not persist the mutation");
    }

    #[test]
    fn delete_is_idempotent() {
        let core = store();
        core.carry("id-1", "web-1", "sizing", 1, &SizingV1::default()).unwrap();
        core.delete(&Ref::Id("id-1".into())).unwrap();
        core.delete(&Ref::Id("id-1".into())).unwrap();
        assert!(core.read(&Ref::Id("id-1".into())).is_err());
    }

    #[test]
    fn browse_visits_every_row() {
        let core = store();
        core.carry("id-1", "web-1", "sizing", 1, &SizingV1::default()).unwrap();
        core.carry("id-2", "web-2", "sizing", 1, &SizingV1::default()).unwrap();
        let mut seen = Vec::new();
        core.browse(&mut |row| {
            seen.push(row.id.clone());
            Ok(())
        })
        .unwrap();
        seen.sort();
        assert_eq!(seen, vec!["id-1", "id-2"]);
    }

    #[test]
    fn missing_property_is_created_with_zero_value_on_read() {
        // carry under a different module so "sizing" is absent on this row
        #[derive(Serialize, Deserialize, Clone, Default)]
        struct Other;
        let mut registry = PropertyRegistry::new();
        registry.register_zero("sizing", 1, &SizingV1::default());
        registry.register_zero("other", 1, &Other);
        let core = MetadataCore::new(ResourceKind::Host, Arc::new(InMemoryBlobStore::new()), Arc::new(registry));
        core.carry("id-1", "web-1", "other", 1, &Other).unwrap();

        let sizing: SizingV1 = core.inspect(&Ref::Id("id-1".into()), "sizing", |v: &SizingV1| v.clone()).unwrap();
        assert_eq!(sizing, SizingV1::default());
    }

    #[test]
    fn property_upgrade_runs_declaratively_on_reload() {
        let mut registry = PropertyRegistry::new();
        registry.register_zero("sizing", 1, &SizingV1::default());
        registry.register_zero("sizing", 2, &SizingV2::default());
        registry.register_upgrade("sizing", 1, |old| {
            let v1: SizingV1 = serde_json::from_value(old.clone()).unwrap();
            serde_json::to_value(SizingV2 { cpu: v1.cpu, ram_mib: v1.ram_mib, gpu: 0 }).unwrap()
        });
        let core = MetadataCore::new(ResourceKind::Host, Arc::new(InMemoryBlobStore::new()), Arc::new(registry));
        core.carry("id-1", "web-1", "sizing", 1, &SizingV1 { cpu: 2, ram_mib: 1024 }).unwrap();

        let row = core.reload(&Ref::Id("id-1".into())).unwrap();
        let sizing: SizingV2 = core.inspect(&Ref::Id("id-1".into()), "sizing", |v: &SizingV2| v.clone()).unwrap();
        assert_eq!(sizing, SizingV2 { cpu: 2, ram_mib: 1024, gpu: 0 });
        assert!(row.properties.contains_key("sizing@v1"));
        assert_eq!(row.properties.get("sizing@v1").unwrap().version, 1);
    }

    #[test]
    fn upgrade_preserves_legacy_record_until_garbage_collected() {
        let mut registry = PropertyRegistry::new();
        registry.register_zero("sizing", 1, &SizingV1::default());
        registry.register_zero("sizing", 2, &SizingV2::default());
        registry.register_upgrade("sizing", 1, |old| {
            let v1: SizingV1 = serde_json::from_value(old.clone()).unwrap();
            serde_json::to_value(SizingV2 { cpu: v1.cpu, ram_mib: v1.ram_mib, gpu: 0 }).unwrap()
        });
        let core = MetadataCore::new(ResourceKind::Host, Arc::new(InMemoryBlobStore::new()), Arc::new(registry));
        core.carry("id-1", "web-1", "sizing", 1, &SizingV1 { cpu: 2, ram_mib: 1024 }).unwrap();
        let row = core.reload(&Ref::Id("id-1".into())).unwrap();
        assert!(row.properties.contains_key("sizing@v1"), "pre-upgrade record should survive the upgrade");

        core.garbage_collect_legacy_properties(&Ref::Id("id-1".into()), "sizing").unwrap();
        let row = core.read(&Ref::Id("id-1".into())).unwrap();
        assert!(!row.properties.contains_key("sizing@v1"));
        assert!(row.properties.contains_key("sizing"), "the canonical current-version entry must remain");
    }
}
