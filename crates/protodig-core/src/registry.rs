//! Registry of admitted descriptor records.
//!
//! A record is admitted once every path it imports is already present.
//! Each path maps to at most one record and the first record admitted for
//! a path wins; later admissions for the same path are no-ops. Because an
//! import must itself have been admitted first, admission order is a
//! topological order of the import graph.

use crate::descriptor::DescriptorRecord;
use crate::error::Error;
use prost_reflect::DescriptorPool;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, trace};

/// Path-keyed store of admitted records
#[derive(Debug, Default)]
pub struct Registry {
    entries: HashMap<String, Arc<DescriptorRecord>>,
    order: Vec<String>,
    /// Import paths treated as present without a record
    external: HashSet<String>,
}

impl Registry {
    /// Creates an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry that treats `paths` as already satisfied imports
    pub fn with_external<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            external: paths.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Try to admit `record`.
    ///
    /// Returns true if the record's path is now present, either because it
    /// was admitted here or because some record already holds the path.
    /// Returns false, leaving the registry untouched, when an import is
    /// missing.
    pub fn try_admit(&mut self, record: &Arc<DescriptorRecord>) -> bool {
        if self.entries.contains_key(&record.path) {
            trace!("'{}' already admitted", record.path);
            return true;
        }

        if let Some(missing) = self.unmet_imports(record).next() {
            trace!("'{}' waiting on import '{}'", record.path, missing);
            return false;
        }

        debug!("Admitted '{}'", record.path);
        self.entries.insert(record.path.clone(), Arc::clone(record));
        self.order.push(record.path.clone());
        true
    }

    /// Whether `path` satisfies an import
    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path) || self.external.contains(path)
    }

    /// The admitted record holding `path`
    pub fn get(&self, path: &str) -> Option<&Arc<DescriptorRecord>> {
        self.entries.get(path)
    }

    /// Whether this exact record (not merely its path) was admitted
    pub fn is_admitted(&self, record: &DescriptorRecord) -> bool {
        self.get(&record.path).is_some_and(|entry| **entry == *record)
    }

    /// Imports of `record` not yet satisfied, in declaration order
    pub fn unmet_imports<'a>(
        &'a self,
        record: &'a DescriptorRecord,
    ) -> impl Iterator<Item = &'a str> + 'a {
        record
            .imports
            .iter()
            .map(String::as_str)
            .filter(move |import| !self.contains(import))
    }

    /// Number of admitted records
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing has been admitted
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Admitted records in admission order
    pub fn iter(&self) -> impl Iterator<Item = &Arc<DescriptorRecord>> {
        self.order.iter().filter_map(|path| self.entries.get(path))
    }

    /// Link every admitted record into a `prost_reflect` descriptor pool.
    ///
    /// Records are added in admission order so imports always precede
    /// their importers. A record the linker rejects (an unresolvable type
    /// reference, a duplicate symbol) is reported and left out; linking
    /// continues with the rest.
    pub fn link(&self) -> (DescriptorPool, Vec<Error>) {
        let mut pool = DescriptorPool::new();
        let mut failures = Vec::new();

        for record in self.iter() {
            let result = record
                .to_proto()
                .and_then(|proto| {
                    pool.add_file_descriptor_proto(proto)
                        .map_err(|e| Error::descriptor_link(&record.path, e.to_string()))
                });
            if let Err(e) = result {
                debug!("Link failed: {}", e);
                failures.push(e);
            }
        }

        (pool, failures)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;
    use prost_types::field_descriptor_proto::{Label, Type};
    use prost_types::{DescriptorProto, FieldDescriptorProto, FileDescriptorProto};

    fn record(path: &str, imports: &[&str], package: &str) -> Arc<DescriptorRecord> {
        let proto = FileDescriptorProto {
            name: Some(path.to_string()),
            package: Some(package.to_string()),
            dependency: imports.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        };
        Arc::new(DescriptorRecord::decode(proto.encode_to_vec()).unwrap())
    }

    #[test]
    fn test_admit_without_imports() {
        let mut registry = Registry::new();
        let a = record("a.proto", &[], "a");
        assert!(registry.try_admit(&a));
        assert!(registry.contains("a.proto"));
        assert!(registry.is_admitted(&a));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_missing_import_leaves_registry_unchanged() {
        let mut registry = Registry::new();
        let b = record("b.proto", &["a.proto"], "b");
        assert!(!registry.try_admit(&b));
        assert!(registry.is_empty());
        assert_eq!(registry.unmet_imports(&b).collect::<Vec<_>>(), vec!["a.proto"]);

        assert!(registry.try_admit(&record("a.proto", &[], "a")));
        assert!(registry.try_admit(&b));
        assert_eq!(
            registry.iter().map(|r| r.path.as_str()).collect::<Vec<_>>(),
            vec!["a.proto", "b.proto"]
        );
    }

    #[test]
    fn test_first_writer_wins() {
        let mut registry = Registry::new();
        let first = record("a.proto", &[], "first");
        let second = record("a.proto", &[], "second");

        assert!(registry.try_admit(&first));
        assert!(registry.try_admit(&second));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("a.proto").unwrap().package, "first");
        assert!(registry.is_admitted(&first));
        assert!(!registry.is_admitted(&second));
    }

    #[test]
    fn test_external_paths_satisfy_imports() {
        let mut registry = Registry::with_external(["google/protobuf/descriptor.proto"]);
        let options = record("opts.proto", &["google/protobuf/descriptor.proto"], "opts");
        assert!(registry.try_admit(&options));
        assert!(registry.get("google/protobuf/descriptor.proto").is_none());
    }

    #[test]
    fn test_link_reports_unresolved_types() {
        let broken = FileDescriptorProto {
            name: Some("broken.proto".to_string()),
            package: Some("broken".to_string()),
            message_type: vec![DescriptorProto {
                name: Some("Holder".to_string()),
                field: vec![FieldDescriptorProto {
                    name: Some("ghost".to_string()),
                    number: Some(1),
                    label: Some(Label::Optional as i32),
                    r#type: Some(Type::Message as i32),
                    type_name: Some(".broken.Missing".to_string()),
                    ..Default::default()
                }],
                ..Default::default()
            }],
            ..Default::default()
        };

        let mut registry = Registry::new();
        assert!(registry.try_admit(&record("ok.proto", &[], "ok")));
        assert!(registry.try_admit(&Arc::new(
            DescriptorRecord::decode(broken.encode_to_vec()).unwrap()
        )));

        let (pool, failures) = registry.link();
        assert!(pool.get_file_by_name("ok.proto").is_some());
        assert_eq!(failures.len(), 1);
        assert!(matches!(
            &failures[0],
            Error::DescriptorLink { path, .. } if path == "broken.proto"
        ));
    }
}
