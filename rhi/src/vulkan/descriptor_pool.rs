use anyhow::Result;
use log::*;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use vulkanalia::vk::{self, DeviceV1_0, Handle, HasBuilder};

use super::constants::{
    ACCELERATION_STRUCTURE_POOL_SIZE, DESCRIPTOR_POOL_SIZES, MAX_POOL_DESCRIPTORS_PER_TYPE,
};
use super::descriptor_set::VulkanDescriptorSet;
use super::device::VulkanDevice;
use super::root_signature::{UpdateFrequency, VulkanRootSignature};
use crate::error::DescriptorError;

pub trait DescriptorBackend {
    unsafe fn create_pool(
        &self,
        pool_sizes: &[vk::DescriptorPoolSize],
        max_sets: u32,
    ) -> Result<vk::DescriptorPool>;

    unsafe fn allocate_set(
        &self,
        pool: vk::DescriptorPool,
        layout: vk::DescriptorSetLayout,
    ) -> Result<vk::DescriptorSet, vk::ErrorCode>;

    unsafe fn reset_pool(&self, pool: vk::DescriptorPool) -> Result<()>;

    unsafe fn destroy_pool(&self, pool: vk::DescriptorPool);

    unsafe fn write_sets(&self, writes: &[vk::WriteDescriptorSet]);
}

impl DescriptorBackend for VulkanDevice {
    unsafe fn create_pool(
        &self,
        pool_sizes: &[vk::DescriptorPoolSize],
        max_sets: u32,
    ) -> Result<vk::DescriptorPool> {
        let info = vk::DescriptorPoolCreateInfo::builder()
            .pool_sizes(pool_sizes)
            .max_sets(max_sets);
        Ok(self.vk_device.create_descriptor_pool(&info, None)?)
    }

    unsafe fn allocate_set(
        &self,
        pool: vk::DescriptorPool,
        layout: vk::DescriptorSetLayout,
    ) -> Result<vk::DescriptorSet, vk::ErrorCode> {
        let layouts = &[layout];
        let info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(pool)
            .set_layouts(layouts);
        Ok(self.vk_device.allocate_descriptor_sets(&info)?[0])
    }

    unsafe fn reset_pool(&self, pool: vk::DescriptorPool) -> Result<()> {
        self.vk_device
            .reset_descriptor_pool(pool, vk::DescriptorPoolResetFlags::empty())?;
        Ok(())
    }

    unsafe fn destroy_pool(&self, pool: vk::DescriptorPool) {
        self.vk_device.destroy_descriptor_pool(pool, None);
    }

    unsafe fn write_sets(&self, writes: &[vk::WriteDescriptorSet]) {
        self.vk_device
            .update_descriptor_sets(writes, &[] as &[vk::CopyDescriptorSet]);
    }
}

pub fn descriptor_pool_sizes(
    num_descriptor_sets: u32,
    ray_tracing: bool,
) -> Vec<vk::DescriptorPoolSize> {
    let mut sizes = DESCRIPTOR_POOL_SIZES.to_vec();

    if ray_tracing {
        sizes.push((
            vk::DescriptorType::ACCELERATION_STRUCTURE_KHR,
            ACCELERATION_STRUCTURE_POOL_SIZE,
        ));
    }

    sizes
        .into_iter()
        .map(|(type_, count)| {
            vk::DescriptorPoolSize::builder()
                .type_(type_)
                .descriptor_count(
                    count
                        .saturating_mul(num_descriptor_sets)
                        .min(MAX_POOL_DESCRIPTORS_PER_TYPE),
                )
                .build()
        })
        .collect()
}

#[derive(Clone, Debug)]
pub struct DescriptorSetDesc {
    pub root_signature: Arc<VulkanRootSignature>,
    pub update_frequency: UpdateFrequency,
    pub max_sets: u32,
}

#[derive(Debug, Default)]
struct PoolChain {
    current: vk::DescriptorPool,
    pools: Vec<vk::DescriptorPool>,
    used_sets: u32,
}

/// A growable descriptor pool. Running out of space appends a fresh backing pool; older
/// pools are kept alive so the sets they handed out stay valid until `destroy`.
#[derive(Debug)]
pub struct VulkanDescriptorPool {
    pool_sizes: Vec<vk::DescriptorPoolSize>,
    num_descriptor_sets: u32,
    chain: Mutex<PoolChain>,
}

impl VulkanDescriptorPool {
    pub unsafe fn new<B>(backend: &B, num_descriptor_sets: u32, ray_tracing: bool) -> Result<Self>
    where
        B: DescriptorBackend + ?Sized,
    {
        let pool_sizes = descriptor_pool_sizes(num_descriptor_sets, ray_tracing);
        let current = backend.create_pool(&pool_sizes, num_descriptor_sets)?;
        debug!(
            "Created descriptor pool for {} sets{}.",
            num_descriptor_sets,
            if ray_tracing {
                " with acceleration structures"
            } else {
                ""
            }
        );

        Ok(Self {
            pool_sizes,
            num_descriptor_sets,
            chain: Mutex::new(PoolChain {
                current,
                pools: vec![current],
                used_sets: 0,
            }),
        })
    }

    fn chain(&self) -> MutexGuard<'_, PoolChain> {
        self.chain.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn pool_sizes(&self) -> &[vk::DescriptorPoolSize] {
        &self.pool_sizes
    }

    pub fn num_descriptor_sets(&self) -> u32 {
        self.num_descriptor_sets
    }

    pub fn current_pool(&self) -> vk::DescriptorPool {
        self.chain().current
    }

    pub fn pool_count(&self) -> usize {
        self.chain().pools.len()
    }

    pub fn used_descriptor_set_count(&self) -> u32 {
        self.chain().used_sets
    }

    pub unsafe fn retrieve_descriptor_set<B>(
        &self,
        backend: &B,
        desc: &DescriptorSetDesc,
    ) -> Result<VulkanDescriptorSet>
    where
        B: DescriptorBackend + ?Sized,
    {
        let root_signature = &desc.root_signature;
        let frequency = desc.update_frequency;

        let layout = root_signature.set_layout(frequency);
        if layout.is_null() {
            error!("Cannot allocate a descriptor set with no layout ({:?}).", frequency);
            return Err(DescriptorError::NullLayout(frequency).into());
        }

        let dynamic_count = root_signature.dynamic_descriptor_count(frequency);
        if dynamic_count > 1 {
            return Err(DescriptorError::TooManyDynamicDescriptors {
                frequency,
                count: dynamic_count,
            }
            .into());
        }

        let handles = (0..desc.max_sets)
            .map(|_| self.retrieve_vk_descriptor_set(backend, layout))
            .collect::<Result<Vec<_>>>()?;

        Ok(VulkanDescriptorSet::new(
            handles,
            Arc::clone(root_signature),
            frequency,
        ))
    }

    pub unsafe fn retrieve_vk_descriptor_set<B>(
        &self,
        backend: &B,
        layout: vk::DescriptorSetLayout,
    ) -> Result<vk::DescriptorSet>
    where
        B: DescriptorBackend + ?Sized,
    {
        let mut chain = self.chain();

        let set = match backend.allocate_set(chain.current, layout) {
            Ok(set) => set,
            Err(first) => {
                debug!(
                    "Descriptor pool exhausted after {} sets ({}), growing.",
                    chain.used_sets, first
                );

                let pool = backend.create_pool(&self.pool_sizes, self.num_descriptor_sets)?;
                chain.pools.push(pool);
                chain.current = pool;
                chain.used_sets = 0;

                backend.allocate_set(pool, layout).map_err(|error| {
                    error!("Descriptor set allocation failed on a fresh pool: {}", error);
                    DescriptorError::PoolExhausted(error)
                })?
            }
        };

        chain.used_sets += 1;

        Ok(set)
    }

    pub unsafe fn reset<B>(&self, backend: &B) -> Result<()>
    where
        B: DescriptorBackend + ?Sized,
    {
        let mut chain = self.chain();
        backend.reset_pool(chain.current)?;
        chain.used_sets = 0;
        Ok(())
    }

    pub unsafe fn destroy<B>(&mut self, backend: &B)
    where
        B: DescriptorBackend + ?Sized,
    {
        let chain = self
            .chain
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);

        if !chain.pools.is_empty() {
            debug!("Destroying {} descriptor pools.", chain.pools.len());
        }
        for pool in chain.pools.drain(..) {
            backend.destroy_pool(pool);
        }
        chain.current = vk::DescriptorPool::null();
        chain.used_sets = 0;
    }
}
