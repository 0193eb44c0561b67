//! The partition abstraction: a storage backend responsible for one naming
//! context, addressed by the nexus through longest-suffix-match routing.

use crate::context::{OperationContext, OperationPayload, Scope};
use crate::cursor::{Cursor, VecCursor};
use crate::dn::Dn;
use crate::entry::Entry;
use crate::error::{DirResult, DirectoryError, DirectoryErrorKind};
use crate::filter::Filter;
use crate::schema::SchemaManager;
use std::collections::BTreeMap;

/// One naming context's storage. DNs passed in and returned are absolute
/// (rooted at the naming context's suffix, which is itself a stored entry);
/// the nexus is responsible for routing a request to the partition whose
/// suffix is the longest same-or-ancestor match before calling in here.
pub trait Partition: Send + Sync {
    fn suffix(&self) -> &Dn;
    fn has_entry(&self, dn: &Dn) -> DirResult<bool>;
    fn lookup(&self, dn: &Dn) -> DirResult<Entry>;
    fn add(&self, entry: Entry) -> DirResult<()>;
    fn delete(&self, dn: &Dn) -> DirResult<Entry>;
    fn modify(
        &self,
        schema: &dyn SchemaManager,
        ctx: &OperationContext,
    ) -> DirResult<(Entry, Entry)>;
    fn rename(&self, dn: &Dn, new_rdn: &str, delete_old_rdn: bool) -> DirResult<Dn>;
    fn r#move(&self, dn: &Dn, new_superior: &Dn) -> DirResult<Dn>;
    fn search(
        &self,
        base: &Dn,
        scope: Scope,
        filter: &Filter,
        schema: &dyn SchemaManager,
    ) -> DirResult<Box<dyn Cursor<Item = Entry>>>;
}

/// An in-memory partition keyed by normalized DN string, sufficient for the
/// engine's own tests and for an embedder that hasn't wired a real backing
/// store yet.
pub struct MemoryPartition {
    suffix: Dn,
    entries: parking_lot::RwLock<BTreeMap<String, Entry>>,
}

impl MemoryPartition {
    pub fn new(suffix: Dn) -> Self {
        Self {
            suffix,
            entries: parking_lot::RwLock::new(BTreeMap::new()),
        }
    }

    fn key(dn: &Dn) -> String {
        dn.to_normalized_string()
    }
}

impl Partition for MemoryPartition {
    fn suffix(&self) -> &Dn {
        &self.suffix
    }

    fn has_entry(&self, dn: &Dn) -> DirResult<bool> {
        Ok(self.entries.read().contains_key(&Self::key(dn)))
    }

    fn lookup(&self, dn: &Dn) -> DirResult<Entry> {
        self.entries
            .read()
            .get(&Self::key(dn))
            .cloned()
            .ok_or_else(|| DirectoryError::no_such_object(dn))
    }

    fn add(&self, entry: Entry) -> DirResult<()> {
        let key = Self::key(entry.dn());
        let mut guard = self.entries.write();
        if guard.contains_key(&key) {
            return Err(DirectoryError::entry_already_exists(entry.dn()));
        }
        if let Some(parent) = entry.dn().parent() {
            if !parent.is_same_or_ancestor_of(&self.suffix) && !guard.contains_key(&Self::key(&parent))
            {
                return Err(DirectoryError::new(
                    DirectoryErrorKind::NoSuchObject,
                    format!("parent does not exist: {parent}"),
                ));
            }
        }
        guard.insert(key, entry);
        Ok(())
    }

    fn delete(&self, dn: &Dn) -> DirResult<Entry> {
        let key = Self::key(dn);
        let mut guard = self.entries.write();
        if guard.keys().any(|k| k != &key && k.ends_with(&format!(",{key}"))) {
            return Err(DirectoryError::new(
                DirectoryErrorKind::UnwillingToPerform,
                format!("entry has children: {dn}"),
            ));
        }
        guard
            .remove(&key)
            .ok_or_else(|| DirectoryError::no_such_object(dn))
    }

    fn modify(
        &self,
        schema: &dyn SchemaManager,
        ctx: &OperationContext,
    ) -> DirResult<(Entry, Entry)> {
        let modifications = match &ctx.payload {
            OperationPayload::Modify { modifications } => modifications,
            _ => {
                return Err(DirectoryError::new(
                    DirectoryErrorKind::Other,
                    "modify() called with a non-modify context",
                ))
            }
        };
        let key = Self::key(&ctx.target);
        let mut guard = self.entries.write();
        let entry = guard
            .get_mut(&key)
            .ok_or_else(|| DirectoryError::no_such_object(&ctx.target))?;
        let before = entry.clone();
        entry.apply_modifications(schema, modifications);
        Ok((before, entry.clone()))
    }

    fn rename(&self, dn: &Dn, new_rdn: &str, delete_old_rdn: bool) -> DirResult<Dn> {
        let old_key = Self::key(dn);
        let mut guard = self.entries.write();
        let mut entry = guard
            .remove(&old_key)
            .ok_or_else(|| DirectoryError::no_such_object(dn))?;
        let new_leaf = Dn::parse(new_rdn)?;
        let parent = dn.parent().unwrap_or_else(Dn::root_dse);
        let new_dn = new_leaf.prepend_to(&parent);
        // `delete_old_rdn` only matters for backends that store RDN
        // attributes redundantly inside the entry; this in-memory partition
        // keys purely by DN, so there is nothing extra to drop.
        let _ = delete_old_rdn;
        let new_key = Self::key(&new_dn);
        if guard.contains_key(&new_key) {
            guard.insert(old_key, entry);
            return Err(DirectoryError::entry_already_exists(&new_dn));
        }
        entry.set_dn(new_dn.clone());
        guard.insert(new_key, entry);
        Ok(new_dn)
    }

    fn r#move(&self, dn: &Dn, new_superior: &Dn) -> DirResult<Dn> {
        let old_key = Self::key(dn);
        let mut guard = self.entries.write();
        let mut entry = guard
            .remove(&old_key)
            .ok_or_else(|| DirectoryError::no_such_object(dn))?;
        let leaf = dn
            .rdn()
            .cloned()
            .ok_or_else(|| DirectoryError::new(DirectoryErrorKind::NamingViolation, "cannot move the root DSE"))?;
        let mut new_rdns = vec![leaf];
        new_rdns.extend(new_superior.rdns().iter().cloned());
        let new_dn = Dn::from_rdns(new_rdns);
        let new_key = Self::key(&new_dn);
        if guard.contains_key(&new_key) {
            guard.insert(old_key, entry);
            return Err(DirectoryError::entry_already_exists(&new_dn));
        }
        entry.set_dn(new_dn.clone());
        guard.insert(new_key, entry);
        Ok(new_dn)
    }

    fn search(
        &self,
        base: &Dn,
        scope: Scope,
        filter: &Filter,
        schema: &dyn SchemaManager,
    ) -> DirResult<Box<dyn Cursor<Item = Entry>>> {
        let guard = self.entries.read();
        let matches: Vec<Entry> = guard
            .values()
            .filter(|e| match scope {
                Scope::Base => e.dn().eq_normalized(base),
                Scope::OneLevel => e
                    .dn()
                    .parent()
                    .map(|p| p.eq_normalized(base))
                    .unwrap_or(false),
                Scope::Subtree => base.is_same_or_ancestor_of(e.dn()),
            })
            .filter(|e| filter.matches(schema, e))
            .cloned()
            .collect();
        Ok(Box::new(VecCursor::new(matches)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::OBJECT_CLASS;
    use crate::schema::CaseFoldSchema;

    fn schema() -> CaseFoldSchema {
        CaseFoldSchema
    }

    fn make_entry(dn: &str) -> Entry {
        let mut e = Entry::new(Dn::parse(dn).unwrap());
        e.set(OBJECT_CLASS, vec!["top".into()]);
        e
    }

    #[test]
    fn add_lookup_delete_roundtrip() {
        let suffix = Dn::parse("dc=example").unwrap();
        let p = MemoryPartition::new(suffix);
        p.add(make_entry("dc=example")).unwrap();
        p.add(make_entry("ou=people,dc=example")).unwrap();
        assert!(p.has_entry(&Dn::parse("ou=people,dc=example").unwrap()).unwrap());
        let looked_up = p.lookup(&Dn::parse("ou=people,dc=example").unwrap()).unwrap();
        assert_eq!(looked_up.dn().to_user_string(), "ou=people,dc=example");
        let err = p.add(make_entry("ou=people,dc=example")).unwrap_err();
        assert_eq!(err.kind, DirectoryErrorKind::EntryAlreadyExists);
    }

    #[test]
    fn delete_with_children_is_unwilling_to_perform() {
        let suffix = Dn::parse("dc=example").unwrap();
        let p = MemoryPartition::new(suffix);
        p.add(make_entry("dc=example")).unwrap();
        p.add(make_entry("ou=people,dc=example")).unwrap();
        let err = p.delete(&Dn::parse("dc=example").unwrap()).unwrap_err();
        assert_eq!(err.kind, DirectoryErrorKind::UnwillingToPerform);
    }

    #[test]
    fn subtree_search_respects_scope() {
        let suffix = Dn::parse("dc=example").unwrap();
        let p = MemoryPartition::new(suffix.clone());
        p.add(make_entry("dc=example")).unwrap();
        p.add(make_entry("ou=people,dc=example")).unwrap();
        p.add(make_entry("cn=joe,ou=people,dc=example")).unwrap();
        let schema = schema();
        let mut cursor = p
            .search(&suffix, Scope::Subtree, &Filter::Present(OBJECT_CLASS.into()), &schema)
            .unwrap();
        let mut count = 0;
        while cursor.next().unwrap() {
            count += 1;
        }
        assert_eq!(count, 3);
    }

}
