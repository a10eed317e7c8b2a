//! VM discovery under a folder tree.

use std::collections::BTreeSet;
use std::future::Future;
use std::pin::Pin;

use thiserror::Error;
use tracing::debug;

use crate::inventory::{Inventory, ManagedObject};

/// Names excluded from a run.
///
/// Folder exclusions prune whole subtrees during discovery. VM exclusions
/// are applied when the run driver iterates the discovered VMs.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ExclusionSets {
    folders: BTreeSet<String>,
    vms: BTreeSet<String>,
}

impl ExclusionSets {
    /// Builds exclusion sets from name lists.
    #[must_use]
    pub fn new<F, V>(folders: F, vms: V) -> Self
    where
        F: IntoIterator,
        F::Item: Into<String>,
        V: IntoIterator,
        V::Item: Into<String>,
    {
        Self {
            folders: folders.into_iter().map(Into::into).collect(),
            vms: vms.into_iter().map(Into::into).collect(),
        }
    }

    /// Builds exclusion sets from comma-separated lists.
    #[must_use]
    pub fn from_lists(folders: &str, vms: &str) -> Self {
        Self::new(parse_name_list(folders), parse_name_list(vms))
    }

    /// Excluded folder names.
    #[must_use]
    pub const fn folders(&self) -> &BTreeSet<String> {
        &self.folders
    }

    /// Returns `true` when the VM named `name` must not be backed up.
    #[must_use]
    pub fn excludes_vm(&self, name: &str) -> bool {
        self.vms.contains(name)
    }
}

/// Splits a comma-separated list, trimming whitespace and dropping empty
/// entries.
#[must_use]
pub fn parse_name_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_owned)
        .collect()
}

/// Errors raised while walking the inventory.
#[derive(Debug, Error)]
pub enum DiscoveryError<E>
where
    E: std::error::Error + 'static,
{
    /// Listing a folder failed.
    #[error("failed to list folder {folder}: {source}")]
    List {
        /// Folder being listed.
        folder: String,
        /// Inventory error.
        #[source]
        source: E,
    },
    /// Checking a VM's resource pool failed.
    #[error("failed to inspect VM {vm}: {source}")]
    Inspect {
        /// VM being inspected.
        vm: String,
        /// Inventory error.
        #[source]
        source: E,
    },
}

type DiscoveryFuture<'a, E> =
    Pin<Box<dyn Future<Output = Result<Vec<ManagedObject>, DiscoveryError<E>>> + Send + 'a>>;

/// Collects the assignable VMs reachable from `folder`.
///
/// An excluded folder yields nothing, whatever it contains. VMs without a
/// resource pool (templates, orphans) are skipped; other non-folder children
/// are ignored. Results follow the platform's child order, with each
/// subfolder's VMs spliced in where the subfolder appears.
///
/// # Errors
///
/// Returns [`DiscoveryError`] when listing a folder or inspecting a VM fails.
pub fn collect_vms<'a, I: Inventory>(
    inventory: &'a I,
    folder: &'a ManagedObject,
    excluded_folders: &'a BTreeSet<String>,
) -> DiscoveryFuture<'a, I::Error> {
    Box::pin(async move {
        if excluded_folders.contains(&folder.name) {
            debug!(folder = %folder.name, "skipping excluded folder");
            return Ok(Vec::new());
        }

        let children = inventory
            .list_children(folder)
            .await
            .map_err(|source| DiscoveryError::List {
                folder: folder.name.clone(),
                source,
            })?;

        let mut vms = Vec::new();
        for child in &children {
            if child.is_vm() {
                let assignable =
                    inventory
                        .is_assignable(child)
                        .await
                        .map_err(|source| DiscoveryError::Inspect {
                            vm: child.name.clone(),
                            source,
                        })?;
                if assignable {
                    vms.push(child.clone());
                }
            } else if child.is_folder() {
                vms.extend(collect_vms(inventory, child, excluded_folders).await?);
            }
        }
        Ok(vms)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::ObjectKind;
    use crate::test_support::{FakeInventory, FakeInventoryError};
    use rstest::{fixture, rstest};

    fn names(vms: &[ManagedObject]) -> Vec<&str> {
        vms.iter().map(|vm| vm.name.as_str()).collect()
    }

    struct Tree {
        inventory: FakeInventory,
        root: ManagedObject,
        prod: ManagedObject,
    }

    #[fixture]
    fn tree() -> Tree {
        let inventory = FakeInventory::new();
        let datacenter = inventory.add_datacenter("dc");
        let root = datacenter.vm_folder;
        inventory.add_vm(&root, "vcenter");
        let prod = inventory.add_folder(&root, "Prod");
        inventory.add_vm(&prod, "web01");
        let nested = inventory.add_folder(&prod, "Databases");
        inventory.add_vm(&nested, "db01");
        inventory.add_template(&prod, "golden-image");
        inventory.add_object(&prod, "prod-vapp", ObjectKind::Other);
        inventory.add_vm(&prod, "web02");
        let lab = inventory.add_folder(&root, "Lab");
        inventory.add_vm(&lab, "scratch");
        Tree {
            inventory,
            root,
            prod,
        }
    }

    #[rstest]
    #[tokio::test]
    async fn collects_assignable_vms_depth_first_in_native_order(tree: Tree) {
        let vms = collect_vms(&tree.inventory, &tree.root, &BTreeSet::new())
            .await
            .expect("discovery should succeed");

        assert_eq!(names(&vms), ["vcenter", "web01", "db01", "web02", "scratch"]);
    }

    #[rstest]
    #[tokio::test]
    async fn excluded_folder_prunes_entire_subtree(tree: Tree) {
        let excluded = BTreeSet::from([String::from("Prod")]);

        let vms = collect_vms(&tree.inventory, &tree.root, &excluded)
            .await
            .expect("discovery should succeed");

        assert_eq!(names(&vms), ["vcenter", "scratch"]);
    }

    #[rstest]
    #[tokio::test]
    async fn excluded_start_folder_yields_nothing(tree: Tree) {
        let excluded = BTreeSet::from([String::from("Prod")]);

        let vms = collect_vms(&tree.inventory, &tree.prod, &excluded)
            .await
            .expect("discovery should succeed");

        assert!(vms.is_empty());
    }

    #[rstest]
    #[tokio::test]
    async fn templates_are_never_collected(tree: Tree) {
        let vms = collect_vms(&tree.inventory, &tree.prod, &BTreeSet::new())
            .await
            .expect("discovery should succeed");

        assert!(!names(&vms).contains(&"golden-image"));
    }

    #[rstest]
    #[tokio::test]
    async fn listing_failures_name_the_folder(tree: Tree) {
        tree.inventory.fail_listing(&tree.prod);

        let err = collect_vms(&tree.inventory, &tree.root, &BTreeSet::new())
            .await
            .expect_err("discovery should fail");

        assert!(matches!(
            err,
            DiscoveryError::List {
                ref folder,
                source: FakeInventoryError::ListFailed(_),
            } if folder == "Prod"
        ));
    }

    #[rstest]
    #[case("", &[])]
    #[case("Lab", &["Lab"])]
    #[case(" Lab ,Test,  Old Stuff ", &["Lab", "Test", "Old Stuff"])]
    #[case("Lab,,", &["Lab"])]
    fn name_lists_split_on_commas(#[case] raw: &str, #[case] expected: &[&str]) {
        assert_eq!(parse_name_list(raw), expected);
    }

    #[test]
    fn exclusion_sets_match_vm_names_exactly() {
        let exclusions = ExclusionSets::from_lists("Lab", "web01, db01");

        assert!(exclusions.excludes_vm("web01"));
        assert!(!exclusions.excludes_vm("web"));
        assert!(exclusions.folders().contains("Lab"));
    }
}
