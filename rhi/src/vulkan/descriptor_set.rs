use anyhow::Result;
use log::*;
use std::sync::Arc;
use vulkanalia::vk::{self, Handle, HasBuilder};

use super::command_buffer::{CommandRecorder, VulkanCommandBuffer};
use super::descriptor_pool::DescriptorBackend;
use super::root_signature::{
    DescriptorInfo, DescriptorUpdateData, UpdateFrequency, VulkanRootSignature,
};
use crate::error::DescriptorError;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BufferRange {
    pub buffer: vk::Buffer,
    pub offset: vk::DeviceSize,
    pub size: vk::DeviceSize,
}

impl BufferRange {
    pub fn whole(buffer: vk::Buffer) -> Self {
        Self {
            buffer,
            offset: 0,
            size: vk::WHOLE_SIZE as vk::DeviceSize,
        }
    }
}

#[derive(Clone, Debug)]
pub enum DescriptorResource {
    Samplers(Vec<vk::Sampler>),
    Images(Vec<vk::ImageView>),
    CombinedImageSamplers(Vec<(vk::ImageView, vk::Sampler)>),
    Buffers(Vec<BufferRange>),
    TexelBuffers(Vec<vk::BufferView>),
    AccelerationStructures(Vec<vk::AccelerationStructureKHR>),
}

impl DescriptorResource {
    pub fn len(&self) -> usize {
        match self {
            DescriptorResource::Samplers(v) => v.len(),
            DescriptorResource::Images(v) => v.len(),
            DescriptorResource::CombinedImageSamplers(v) => v.len(),
            DescriptorResource::Buffers(v) => v.len(),
            DescriptorResource::TexelBuffers(v) => v.len(),
            DescriptorResource::AccelerationStructures(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn accepts(&self, descriptor_type: vk::DescriptorType) -> bool {
        use vk::DescriptorType as T;

        match self {
            DescriptorResource::Samplers(_) => descriptor_type == T::SAMPLER,
            DescriptorResource::Images(_) => matches!(
                descriptor_type,
                T::SAMPLED_IMAGE | T::STORAGE_IMAGE | T::INPUT_ATTACHMENT
            ),
            DescriptorResource::CombinedImageSamplers(_) => {
                descriptor_type == T::COMBINED_IMAGE_SAMPLER
            }
            DescriptorResource::Buffers(_) => matches!(
                descriptor_type,
                T::UNIFORM_BUFFER
                    | T::STORAGE_BUFFER
                    | T::UNIFORM_BUFFER_DYNAMIC
                    | T::STORAGE_BUFFER_DYNAMIC
            ),
            DescriptorResource::TexelBuffers(_) => matches!(
                descriptor_type,
                T::UNIFORM_TEXEL_BUFFER | T::STORAGE_TEXEL_BUFFER
            ),
            DescriptorResource::AccelerationStructures(_) => {
                descriptor_type == T::ACCELERATION_STRUCTURE_KHR
            }
        }
    }

    fn update_data(&self, index: usize, base: DescriptorUpdateData) -> DescriptorUpdateData {
        let image_layout = match base {
            DescriptorUpdateData::Image { image_layout, .. } => image_layout,
            _ => vk::ImageLayout::UNDEFINED,
        };

        match self {
            DescriptorResource::Samplers(v) => DescriptorUpdateData::Image {
                sampler: v[index],
                image_view: vk::ImageView::null(),
                image_layout,
            },
            DescriptorResource::Images(v) => DescriptorUpdateData::Image {
                sampler: vk::Sampler::null(),
                image_view: v[index],
                image_layout,
            },
            DescriptorResource::CombinedImageSamplers(v) => DescriptorUpdateData::Image {
                sampler: v[index].1,
                image_view: v[index].0,
                image_layout,
            },
            DescriptorResource::Buffers(v) => DescriptorUpdateData::Buffer {
                buffer: v[index].buffer,
                offset: v[index].offset,
                range: v[index].size,
            },
            DescriptorResource::TexelBuffers(v) => DescriptorUpdateData::TexelBuffer(v[index]),
            DescriptorResource::AccelerationStructures(v) => {
                DescriptorUpdateData::AccelerationStructure(v[index])
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DescriptorTarget {
    Name(String),
    Index(usize),
}

#[derive(Clone, Debug)]
pub struct DescriptorData {
    pub target: DescriptorTarget,
    pub array_offset: u32,
    pub resource: DescriptorResource,
}

impl DescriptorData {
    pub fn named(name: impl Into<String>, resource: DescriptorResource) -> Self {
        Self {
            target: DescriptorTarget::Name(name.into()),
            array_offset: 0,
            resource,
        }
    }

    pub fn indexed(index: usize, resource: DescriptorResource) -> Self {
        Self {
            target: DescriptorTarget::Index(index),
            array_offset: 0,
            resource,
        }
    }

    pub fn with_array_offset(mut self, array_offset: u32) -> Self {
        self.array_offset = array_offset;
        self
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
struct PendingWrite {
    descriptor: usize,
    first_element: u32,
    count: u32,
}

enum WriteSource {
    Images(Vec<vk::DescriptorImageInfo>),
    Buffers(Vec<vk::DescriptorBufferInfo>),
    TexelBuffers(Vec<vk::BufferView>),
    AccelerationStructures(Vec<vk::AccelerationStructureKHR>),
}

impl WriteSource {
    fn new(elements: &[DescriptorUpdateData]) -> Self {
        match elements.first() {
            Some(DescriptorUpdateData::Buffer { .. }) => WriteSource::Buffers(
                elements
                    .iter()
                    .filter_map(|e| match *e {
                        DescriptorUpdateData::Buffer {
                            buffer,
                            offset,
                            range,
                        } => Some(vk::DescriptorBufferInfo {
                            buffer,
                            offset,
                            range,
                        }),
                        _ => None,
                    })
                    .collect(),
            ),
            Some(DescriptorUpdateData::TexelBuffer(_)) => WriteSource::TexelBuffers(
                elements
                    .iter()
                    .filter_map(|e| match *e {
                        DescriptorUpdateData::TexelBuffer(view) => Some(view),
                        _ => None,
                    })
                    .collect(),
            ),
            Some(DescriptorUpdateData::AccelerationStructure(_)) => {
                WriteSource::AccelerationStructures(
                    elements
                        .iter()
                        .filter_map(|e| match *e {
                            DescriptorUpdateData::AccelerationStructure(a) => Some(a),
                            _ => None,
                        })
                        .collect(),
                )
            }
            _ => WriteSource::Images(
                elements
                    .iter()
                    .filter_map(|e| match *e {
                        DescriptorUpdateData::Image {
                            sampler,
                            image_view,
                            image_layout,
                        } => Some(vk::DescriptorImageInfo {
                            sampler,
                            image_view,
                            image_layout,
                        }),
                        _ => None,
                    })
                    .collect(),
            ),
        }
    }
}

/// `max_sets` native descriptor sets of one root signature slot, each with its own copy
/// of the update data so unchanged descriptors are never rewritten.
#[derive(Debug)]
pub struct VulkanDescriptorSet {
    handles: Vec<vk::DescriptorSet>,
    root_signature: Arc<VulkanRootSignature>,
    update_frequency: UpdateFrequency,
    update_data: Vec<Vec<DescriptorUpdateData>>,
    dynamic_offsets: Vec<u32>,
    dynamic_descriptor_count: u32,
}

impl VulkanDescriptorSet {
    pub fn new(
        handles: Vec<vk::DescriptorSet>,
        root_signature: Arc<VulkanRootSignature>,
        update_frequency: UpdateFrequency,
    ) -> Self {
        let template = root_signature.update_template(update_frequency).to_vec();
        let dynamic_descriptor_count = root_signature.dynamic_descriptor_count(update_frequency);

        Self {
            update_data: vec![template; handles.len()],
            dynamic_offsets: vec![0; handles.len()],
            handles,
            root_signature,
            update_frequency,
            dynamic_descriptor_count,
        }
    }

    pub fn handles(&self) -> &[vk::DescriptorSet] {
        &self.handles
    }

    pub fn max_sets(&self) -> u32 {
        self.handles.len() as u32
    }

    pub fn update_frequency(&self) -> UpdateFrequency {
        self.update_frequency
    }

    pub fn root_signature(&self) -> &Arc<VulkanRootSignature> {
        &self.root_signature
    }

    pub fn update_data(&self, index: usize) -> Option<&[DescriptorUpdateData]> {
        self.update_data.get(index).map(Vec::as_slice)
    }

    pub fn dynamic_offsets(&self, index: usize) -> &[u32] {
        if self.dynamic_descriptor_count == 0 {
            return &[];
        }
        self.dynamic_offsets
            .get(index..index + 1)
            .unwrap_or_default()
    }

    fn check_index(&self, index: usize) -> Result<(), DescriptorError> {
        if index >= self.handles.len() {
            return Err(DescriptorError::SetIndexOutOfRange {
                index,
                max_sets: self.max_sets(),
            });
        }
        Ok(())
    }

    fn resolve(&self, target: &DescriptorTarget) -> Result<usize, DescriptorError> {
        match target {
            DescriptorTarget::Name(name) => self
                .root_signature
                .descriptor_index(name)
                .ok_or_else(|| DescriptorError::UnknownDescriptor(name.clone())),
            DescriptorTarget::Index(index) => {
                if *index < self.root_signature.descriptors().len() {
                    Ok(*index)
                } else {
                    Err(DescriptorError::UnknownDescriptor(format!("#{}", index)))
                }
            }
        }
    }

    fn check_descriptor(
        &self,
        info: &DescriptorInfo,
        param: &DescriptorData,
    ) -> Result<(), DescriptorError> {
        if info.update_frequency != self.update_frequency {
            return Err(DescriptorError::FrequencyMismatch {
                name: info.name.clone(),
                expected: self.update_frequency,
                actual: info.update_frequency,
            });
        }

        if !param.resource.accepts(info.descriptor_type) {
            return Err(DescriptorError::ResourceMismatch {
                name: info.name.clone(),
                descriptor_type: info.descriptor_type,
            });
        }

        let requested = param.array_offset as usize + param.resource.len();
        if requested > info.count as usize {
            return Err(DescriptorError::ArrayOverflow {
                name: info.name.clone(),
                capacity: info.count,
                requested,
            });
        }

        if info.is_dynamic() {
            if let DescriptorResource::Buffers(buffers) = &param.resource {
                if let Some(range) = buffers.iter().find(|r| u32::try_from(r.offset).is_err()) {
                    return Err(DescriptorError::DynamicOffsetOutOfRange {
                        name: info.name.clone(),
                        offset: range.offset,
                    });
                }
            }
        }

        Ok(())
    }

    fn patch(
        &mut self,
        index: usize,
        params: &[DescriptorData],
    ) -> Result<Vec<PendingWrite>, DescriptorError> {
        self.check_index(index)?;

        let resolved = params
            .iter()
            .map(|param| {
                let descriptor = self.resolve(&param.target)?;
                self.check_descriptor(&self.root_signature.descriptors()[descriptor], param)?;
                Ok(descriptor)
            })
            .collect::<Result<Vec<_>, DescriptorError>>()?;

        let root_signature = Arc::clone(&self.root_signature);
        let mut pending = Vec::new();

        for (param, descriptor) in params.iter().zip(resolved) {
            if param.resource.is_empty() {
                continue;
            }

            let info = &root_signature.descriptors()[descriptor];
            let base = DescriptorUpdateData::default_for(info.descriptor_type);
            let first = (info.handle_index + param.array_offset) as usize;
            let mut changed = false;

            for element in 0..param.resource.len() {
                let mut data = param.resource.update_data(element, base);

                if info.is_dynamic() {
                    if let DescriptorUpdateData::Buffer { offset, .. } = &mut data {
                        self.dynamic_offsets[index] = u32::try_from(*offset).map_err(|_| {
                            DescriptorError::DynamicOffsetOutOfRange {
                                name: info.name.clone(),
                                offset: *offset,
                            }
                        })?;
                        *offset = 0;
                    }
                }

                let slot = &mut self.update_data[index][first + element];
                if *slot != data {
                    *slot = data;
                    changed = true;
                }
            }

            if changed {
                pending.push(PendingWrite {
                    descriptor,
                    first_element: param.array_offset,
                    count: param.resource.len() as u32,
                });
            }
        }

        Ok(pending)
    }

    pub unsafe fn update<B>(
        &mut self,
        backend: &B,
        index: usize,
        params: &[DescriptorData],
    ) -> Result<()>
    where
        B: DescriptorBackend + ?Sized,
    {
        let pending = self.patch(index, params)?;
        if pending.is_empty() {
            return Ok(());
        }

        let set = self.handles[index];
        let descriptors = self.root_signature.descriptors();
        let data = &self.update_data[index];

        let sources = pending
            .iter()
            .map(|write| {
                let info = &descriptors[write.descriptor];
                let first = (info.handle_index + write.first_element) as usize;
                WriteSource::new(&data[first..first + write.count as usize])
            })
            .collect::<Vec<_>>();

        let acceleration_structures = sources
            .iter()
            .map(|source| match source {
                WriteSource::AccelerationStructures(handles) => Some(
                    vk::WriteDescriptorSetAccelerationStructureKHR::builder()
                        .acceleration_structures(handles)
                        .build(),
                ),
                _ => None,
            })
            .collect::<Vec<_>>();

        let writes = pending
            .iter()
            .zip(&sources)
            .zip(&acceleration_structures)
            .map(|((write, source), acceleration_structure)| {
                let info = &descriptors[write.descriptor];
                let builder = vk::WriteDescriptorSet::builder()
                    .dst_set(set)
                    .dst_binding(info.binding)
                    .dst_array_element(write.first_element)
                    .descriptor_type(info.descriptor_type);

                let mut native = match source {
                    WriteSource::Images(infos) => builder.image_info(infos).build(),
                    WriteSource::Buffers(infos) => builder.buffer_info(infos).build(),
                    WriteSource::TexelBuffers(views) => builder.texel_buffer_view(views).build(),
                    WriteSource::AccelerationStructures(_) => builder.build(),
                };
                native.descriptor_count = write.count;
                if let Some(acceleration_structure) = acceleration_structure {
                    native.next = (acceleration_structure
                        as *const vk::WriteDescriptorSetAccelerationStructureKHR)
                        .cast();
                }
                native
            })
            .collect::<Vec<_>>();

        trace!(
            "Writing {} descriptors to {:?} set {}.",
            writes.len(),
            self.update_frequency,
            index
        );
        backend.write_sets(&writes);

        Ok(())
    }

    pub unsafe fn bind<R>(
        &self,
        recorder: &R,
        command_buffer: &mut VulkanCommandBuffer,
        index: usize,
    ) -> Result<()>
    where
        R: CommandRecorder + ?Sized,
    {
        self.check_index(index)?;
        command_buffer.bind_descriptor_sets(
            recorder,
            self.root_signature.pipeline_layout(),
            self.update_frequency.index() as u32,
            &[self.handles[index]],
            self.dynamic_offsets(index),
        );
        Ok(())
    }
}
