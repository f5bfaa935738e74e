//! VM identifier allocation.

use std::collections::HashSet;

use ctf_range_core::VmId;
use tracing::debug;

use crate::error::{HypervisorError, Result};
use crate::provisioner::VirtualMachineProvisioner;
use crate::types::VmIdRange;

/// Picks the lowest free identifier in the configured range.
///
/// This is a point-in-time check against live hypervisor state. Callers that
/// need the id to stay free until creation must serialize allocate+create or
/// retry on `Conflict`.
#[derive(Debug, Clone, Copy)]
pub struct VmIdAllocator {
    range: VmIdRange,
}

impl VmIdAllocator {
    /// Create an allocator over `range`.
    #[must_use]
    pub const fn new(range: VmIdRange) -> Self {
        Self { range }
    }

    /// The range identifiers are drawn from.
    #[must_use]
    pub const fn range(&self) -> VmIdRange {
        self.range
    }

    /// Return the first identifier that is neither live on the hypervisor
    /// nor in `reserved`.
    ///
    /// # Errors
    ///
    /// - `AllocationExhausted` if every identifier is taken.
    /// - `Connection` if no session can be established.
    /// - The listing error if neither VMs nor containers can be listed.
    pub async fn allocate(
        &self,
        provisioner: &VirtualMachineProvisioner,
        reserved: &HashSet<VmId>,
    ) -> Result<VmId> {
        let mut in_use: HashSet<VmId> = provisioner
            .list_resources()
            .await?
            .into_iter()
            .map(|r| r.vmid)
            .collect();
        in_use.extend(reserved.iter().copied());

        let vmid = first_free(self.range, &in_use).ok_or(HypervisorError::AllocationExhausted {
            start: self.range.start(),
            max: self.range.max(),
        })?;
        debug!(vmid = %vmid, in_use = in_use.len(), "Allocated VM id");
        Ok(vmid)
    }
}

/// Lowest identifier in `range` not contained in `in_use`.
#[must_use]
pub fn first_free(range: VmIdRange, in_use: &HashSet<VmId>) -> Option<VmId> {
    range.iter().find(|vmid| !in_use.contains(vmid))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::HypervisorConfig;
    use crate::mock::MockHypervisor;
    use crate::types::{PowerState, ResourceClass};

    fn range(start: u32, max: u32) -> VmIdRange {
        VmIdRange::new(VmId::new(start), VmId::new(max)).unwrap()
    }

    #[test]
    fn first_free_skips_used_ids() {
        let in_use: HashSet<_> = [200, 201, 203].into_iter().map(VmId::new).collect();
        assert_eq!(first_free(range(200, 205), &in_use), Some(VmId::new(202)));
        assert_eq!(first_free(range(200, 202), &in_use), None);
    }

    #[test]
    fn first_free_ignores_ids_outside_range() {
        let in_use: HashSet<_> = [100, 9000].into_iter().map(VmId::new).collect();
        assert_eq!(first_free(range(200, 500), &in_use), Some(VmId::new(200)));
    }

    #[tokio::test]
    async fn allocate_considers_both_classes_and_reservations() {
        let mock = MockHypervisor::new()
            .with_vm(VmId::new(200), "web", PowerState::Stopped)
            .with_container(VmId::new(201), "dns");
        let provisioner = VirtualMachineProvisioner::new(
            Arc::new(mock),
            HypervisorConfig::default(),
        );
        let allocator = VmIdAllocator::new(range(200, 210));

        let reserved: HashSet<_> = [VmId::new(202)].into_iter().collect();
        let vmid = allocator.allocate(&provisioner, &reserved).await.unwrap();
        assert_eq!(vmid, VmId::new(203));
    }

    #[tokio::test]
    async fn allocate_refuses_to_guess_without_a_listing() {
        let mock = MockHypervisor::new().with_vm(VmId::new(200), "web", PowerState::Running);
        mock.fail_listing(ResourceClass::Vm, true);
        mock.fail_listing(ResourceClass::Container, true);
        let provisioner = VirtualMachineProvisioner::new(
            Arc::new(mock),
            HypervisorConfig::default(),
        );
        let allocator = VmIdAllocator::new(range(200, 210));

        assert!(allocator.allocate(&provisioner, &HashSet::new()).await.is_err());
    }

    #[tokio::test]
    async fn allocate_exhausted() {
        let mock = MockHypervisor::new()
            .with_vm(VmId::new(200), "a", PowerState::Running)
            .with_vm(VmId::new(201), "b", PowerState::Running);
        let provisioner = VirtualMachineProvisioner::new(
            Arc::new(mock),
            HypervisorConfig::default(),
        );
        let allocator = VmIdAllocator::new(range(200, 202));

        let err = allocator
            .allocate(&provisioner, &HashSet::new())
            .await
            .unwrap_err();
        assert!(matches!(err, HypervisorError::AllocationExhausted { .. }));
    }
}
