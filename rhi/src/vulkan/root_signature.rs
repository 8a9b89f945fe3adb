use anyhow::Result;
use log::*;
use std::collections::HashMap;
use vulkanalia::vk::{self, DeviceV1_0, Handle, HasBuilder};

use super::constants::MAX_DESCRIPTOR_SETS;
use super::device::VulkanDevice;
use crate::error::DescriptorError;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum UpdateFrequency {
    Static = 0,
    PerFrame = 1,
    PerBatch = 2,
    PerDraw = 3,
}

impl UpdateFrequency {
    pub const ALL: [UpdateFrequency; MAX_DESCRIPTOR_SETS] = [
        UpdateFrequency::Static,
        UpdateFrequency::PerFrame,
        UpdateFrequency::PerBatch,
        UpdateFrequency::PerDraw,
    ];

    pub fn index(self) -> usize {
        self as usize
    }
}

#[derive(Clone, Debug)]
pub struct DescriptorDesc {
    pub name: String,
    pub update_frequency: UpdateFrequency,
    pub binding: u32,
    pub descriptor_type: vk::DescriptorType,
    pub count: u32,
    pub stages: vk::ShaderStageFlags,
}

impl DescriptorDesc {
    pub fn new(
        name: impl Into<String>,
        update_frequency: UpdateFrequency,
        binding: u32,
        descriptor_type: vk::DescriptorType,
    ) -> Self {
        Self {
            name: name.into(),
            update_frequency,
            binding,
            descriptor_type,
            count: 1,
            stages: vk::ShaderStageFlags::ALL_GRAPHICS,
        }
    }

    pub fn with_count(mut self, count: u32) -> Self {
        self.count = count;
        self
    }

    pub fn with_stages(mut self, stages: vk::ShaderStageFlags) -> Self {
        self.stages = stages;
        self
    }
}

#[derive(Clone, Debug, Default)]
pub struct RootSignatureDesc {
    pub descriptors: Vec<DescriptorDesc>,
    pub push_constants: Vec<vk::PushConstantRange>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DescriptorInfo {
    pub name: String,
    pub update_frequency: UpdateFrequency,
    pub binding: u32,
    pub descriptor_type: vk::DescriptorType,
    pub count: u32,
    pub stages: vk::ShaderStageFlags,
    pub handle_index: u32,
    pub dynamic_index: Option<u32>,
}

impl DescriptorInfo {
    pub fn is_dynamic(&self) -> bool {
        is_dynamic_type(self.descriptor_type)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DescriptorUpdateData {
    Image {
        sampler: vk::Sampler,
        image_view: vk::ImageView,
        image_layout: vk::ImageLayout,
    },
    Buffer {
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        range: vk::DeviceSize,
    },
    TexelBuffer(vk::BufferView),
    AccelerationStructure(vk::AccelerationStructureKHR),
}

impl DescriptorUpdateData {
    pub fn default_for(descriptor_type: vk::DescriptorType) -> Self {
        use vk::DescriptorType as T;

        let image = |image_layout| DescriptorUpdateData::Image {
            sampler: vk::Sampler::null(),
            image_view: vk::ImageView::null(),
            image_layout,
        };

        match descriptor_type {
            T::SAMPLER => image(vk::ImageLayout::UNDEFINED),
            T::STORAGE_IMAGE => image(vk::ImageLayout::GENERAL),
            T::SAMPLED_IMAGE | T::COMBINED_IMAGE_SAMPLER | T::INPUT_ATTACHMENT => {
                image(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
            }
            T::UNIFORM_TEXEL_BUFFER | T::STORAGE_TEXEL_BUFFER => {
                DescriptorUpdateData::TexelBuffer(vk::BufferView::null())
            }
            T::ACCELERATION_STRUCTURE_KHR => {
                DescriptorUpdateData::AccelerationStructure(vk::AccelerationStructureKHR::null())
            }
            _ => DescriptorUpdateData::Buffer {
                buffer: vk::Buffer::null(),
                offset: 0,
                range: vk::WHOLE_SIZE as vk::DeviceSize,
            },
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct DescriptorSetLayoutInfo {
    pub descriptor_indices: Vec<usize>,
    pub cumulative_descriptor_count: u32,
    pub dynamic_descriptor_count: u32,
    pub update_template: Vec<DescriptorUpdateData>,
    /// Empty slots below a used one still need a layout so set numbers line up.
    pub needs_layout: bool,
}

#[derive(Clone, Debug, Default)]
pub struct DescriptorLayoutPlan {
    pub descriptors: Vec<DescriptorInfo>,
    pub name_to_index: HashMap<String, usize>,
    pub sets: [DescriptorSetLayoutInfo; MAX_DESCRIPTOR_SETS],
    pub push_constants: Vec<vk::PushConstantRange>,
}

fn is_dynamic_type(descriptor_type: vk::DescriptorType) -> bool {
    descriptor_type == vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC
        || descriptor_type == vk::DescriptorType::STORAGE_BUFFER_DYNAMIC
}

fn is_supported_type(descriptor_type: vk::DescriptorType) -> bool {
    use vk::DescriptorType as T;

    matches!(
        descriptor_type,
        T::SAMPLER
            | T::COMBINED_IMAGE_SAMPLER
            | T::SAMPLED_IMAGE
            | T::STORAGE_IMAGE
            | T::UNIFORM_TEXEL_BUFFER
            | T::STORAGE_TEXEL_BUFFER
            | T::UNIFORM_BUFFER
            | T::STORAGE_BUFFER
            | T::UNIFORM_BUFFER_DYNAMIC
            | T::STORAGE_BUFFER_DYNAMIC
            | T::INPUT_ATTACHMENT
            | T::ACCELERATION_STRUCTURE_KHR
    )
}

/// Uniform buffers named like `rootcbv*` or `*dynamic*` are bound with a dynamic offset.
fn resolve_type(desc: &DescriptorDesc) -> vk::DescriptorType {
    if desc.descriptor_type != vk::DescriptorType::UNIFORM_BUFFER {
        return desc.descriptor_type;
    }

    let name = desc.name.to_lowercase();
    if !name.contains("rootcbv") && !name.contains("dynamic") {
        return desc.descriptor_type;
    }

    if desc.count == 1 {
        vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC
    } else {
        warn!(
            "Descriptor ({}): dynamic uniform buffers cannot be arrays.",
            desc.name
        );
        desc.descriptor_type
    }
}

impl DescriptorLayoutPlan {
    pub fn new(desc: &RootSignatureDesc) -> Result<Self, DescriptorError> {
        let mut plan = DescriptorLayoutPlan {
            push_constants: desc.push_constants.clone(),
            ..Default::default()
        };

        for descriptor in &desc.descriptors {
            if plan.name_to_index.contains_key(&descriptor.name) {
                return Err(DescriptorError::DuplicateDescriptor(descriptor.name.clone()));
            }
            if !is_supported_type(descriptor.descriptor_type) {
                return Err(DescriptorError::UnsupportedDescriptorType(
                    descriptor.descriptor_type,
                ));
            }

            let index = plan.descriptors.len();
            plan.name_to_index.insert(descriptor.name.clone(), index);
            plan.descriptors.push(DescriptorInfo {
                name: descriptor.name.clone(),
                update_frequency: descriptor.update_frequency,
                binding: descriptor.binding,
                descriptor_type: resolve_type(descriptor),
                count: descriptor.count,
                stages: descriptor.stages,
                handle_index: 0,
                dynamic_index: None,
            });
            plan.sets[descriptor.update_frequency.index()]
                .descriptor_indices
                .push(index);
        }

        for set in plan.sets.iter_mut() {
            let descriptors = &mut plan.descriptors;
            set.descriptor_indices
                .sort_by_key(|&index| descriptors[index].binding);

            for &index in &set.descriptor_indices {
                let info = &mut descriptors[index];
                info.handle_index = set.cumulative_descriptor_count;
                set.cumulative_descriptor_count += info.count;

                if info.is_dynamic() {
                    info.dynamic_index = Some(set.dynamic_descriptor_count);
                    set.dynamic_descriptor_count += 1;
                }

                let default = DescriptorUpdateData::default_for(info.descriptor_type);
                set.update_template
                    .extend(std::iter::repeat(default).take(info.count as usize));
            }
        }

        let mut higher_needs_layout = false;
        for set in plan.sets.iter_mut().rev() {
            set.needs_layout = !set.descriptor_indices.is_empty() || higher_needs_layout;
            higher_needs_layout = set.needs_layout;
        }

        Ok(plan)
    }

    fn create_set_layouts<C, D>(
        &self,
        mut create: C,
        mut destroy: D,
    ) -> Result<[vk::DescriptorSetLayout; MAX_DESCRIPTOR_SETS]>
    where
        C: FnMut(&[vk::DescriptorSetLayoutBinding]) -> Result<vk::DescriptorSetLayout, vk::ErrorCode>,
        D: FnMut(vk::DescriptorSetLayout),
    {
        let mut set_layouts = [vk::DescriptorSetLayout::null(); MAX_DESCRIPTOR_SETS];

        for frequency in UpdateFrequency::ALL.into_iter().rev() {
            if !self.sets[frequency.index()].needs_layout {
                continue;
            }

            match create(&self.bindings(frequency)) {
                Ok(layout) => set_layouts[frequency.index()] = layout,
                Err(e) => {
                    error!("Failed to create the {:?} descriptor set layout: {}", frequency, e);
                    set_layouts
                        .into_iter()
                        .filter(|layout| !layout.is_null())
                        .for_each(&mut destroy);
                    return Err(e.into());
                }
            }
        }

        Ok(set_layouts)
    }

    fn bindings(&self, frequency: UpdateFrequency) -> Vec<vk::DescriptorSetLayoutBinding> {
        self.sets[frequency.index()]
            .descriptor_indices
            .iter()
            .map(|&index| {
                let info = &self.descriptors[index];
                vk::DescriptorSetLayoutBinding::builder()
                    .binding(info.binding)
                    .descriptor_type(info.descriptor_type)
                    .descriptor_count(info.count)
                    .stage_flags(info.stages)
                    .build()
            })
            .collect()
    }
}

#[derive(Debug)]
pub struct VulkanRootSignature {
    plan: DescriptorLayoutPlan,
    set_layouts: [vk::DescriptorSetLayout; MAX_DESCRIPTOR_SETS],
    pipeline_layout: vk::PipelineLayout,
}

impl VulkanRootSignature {
    pub unsafe fn new(device: &VulkanDevice, desc: &RootSignatureDesc) -> Result<Self> {
        let plan = DescriptorLayoutPlan::new(desc)?;
        let destroy_layout = |layout: vk::DescriptorSetLayout| {
            device.vk_device.destroy_descriptor_set_layout(layout, None)
        };

        let set_layouts = plan.create_set_layouts(
            |bindings| {
                let info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(bindings);
                device.vk_device.create_descriptor_set_layout(&info, None)
            },
            destroy_layout,
        )?;

        let layouts = set_layouts
            .iter()
            .copied()
            .filter(|layout| !layout.is_null())
            .collect::<Vec<_>>();
        let info = vk::PipelineLayoutCreateInfo::builder()
            .set_layouts(&layouts)
            .push_constant_ranges(&plan.push_constants);
        let pipeline_layout = match device.vk_device.create_pipeline_layout(&info, None) {
            Ok(pipeline_layout) => pipeline_layout,
            Err(e) => {
                layouts.into_iter().for_each(destroy_layout);
                return Err(e.into());
            }
        };

        debug!(
            "Created root signature with {} descriptors in {} sets.",
            plan.descriptors.len(),
            layouts.len()
        );

        Ok(Self {
            plan,
            set_layouts,
            pipeline_layout,
        })
    }

    #[cfg(test)]
    pub(crate) fn from_plan(
        plan: DescriptorLayoutPlan,
        set_layouts: [vk::DescriptorSetLayout; MAX_DESCRIPTOR_SETS],
    ) -> Self {
        Self {
            plan,
            set_layouts,
            pipeline_layout: vk::PipelineLayout::null(),
        }
    }

    pub fn descriptors(&self) -> &[DescriptorInfo] {
        &self.plan.descriptors
    }

    pub fn descriptor_index(&self, name: &str) -> Option<usize> {
        self.plan.name_to_index.get(name).copied()
    }

    pub fn descriptor(&self, name: &str) -> Option<&DescriptorInfo> {
        self.descriptor_index(name)
            .map(|index| &self.plan.descriptors[index])
    }

    pub fn set_layout(&self, frequency: UpdateFrequency) -> vk::DescriptorSetLayout {
        self.set_layouts[frequency.index()]
    }

    pub fn set_info(&self, frequency: UpdateFrequency) -> &DescriptorSetLayoutInfo {
        &self.plan.sets[frequency.index()]
    }

    pub fn dynamic_descriptor_count(&self, frequency: UpdateFrequency) -> u32 {
        self.plan.sets[frequency.index()].dynamic_descriptor_count
    }

    pub fn update_template(&self, frequency: UpdateFrequency) -> &[DescriptorUpdateData] {
        &self.plan.sets[frequency.index()].update_template
    }

    pub fn push_constants(&self) -> &[vk::PushConstantRange] {
        &self.plan.push_constants
    }

    pub fn pipeline_layout(&self) -> vk::PipelineLayout {
        self.pipeline_layout
    }

    pub fn set_layouts_for_pipeline(&self) -> Vec<vk::DescriptorSetLayout> {
        self.set_layouts
            .iter()
            .copied()
            .filter(|layout| !layout.is_null())
            .collect()
    }

    pub unsafe fn destroy(&self, device: &VulkanDevice) {
        for layout in self.set_layouts.iter().filter(|l| !l.is_null()) {
            device.vk_device.destroy_descriptor_set_layout(*layout, None);
        }
        device
            .vk_device
            .destroy_pipeline_layout(self.pipeline_layout, None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desc(descriptors: Vec<DescriptorDesc>) -> RootSignatureDesc {
        RootSignatureDesc {
            descriptors,
            push_constants: Vec::new(),
        }
    }

    #[test]
    fn descriptors_are_ordered_by_binding_within_a_set() {
        let plan = DescriptorLayoutPlan::new(&desc(vec![
            DescriptorDesc::new(
                "textures",
                UpdateFrequency::PerFrame,
                2,
                vk::DescriptorType::SAMPLED_IMAGE,
            )
            .with_count(4),
            DescriptorDesc::new(
                "camera",
                UpdateFrequency::PerFrame,
                0,
                vk::DescriptorType::UNIFORM_BUFFER,
            ),
            DescriptorDesc::new(
                "sampler",
                UpdateFrequency::PerFrame,
                1,
                vk::DescriptorType::SAMPLER,
            ),
        ]))
        .unwrap();

        let set = &plan.sets[UpdateFrequency::PerFrame.index()];
        assert_eq!(set.descriptor_indices, [1, 2, 0]);
        assert_eq!(set.cumulative_descriptor_count, 6);
        assert_eq!(set.update_template.len(), 6);

        assert_eq!(plan.descriptors[1].handle_index, 0);
        assert_eq!(plan.descriptors[2].handle_index, 1);
        assert_eq!(plan.descriptors[0].handle_index, 2);
    }

    #[test]
    fn empty_slots_below_a_used_one_get_a_layout() {
        let plan = DescriptorLayoutPlan::new(&desc(vec![DescriptorDesc::new(
            "instances",
            UpdateFrequency::PerBatch,
            0,
            vk::DescriptorType::STORAGE_BUFFER,
        )]))
        .unwrap();

        let needs_layout = plan.sets.iter().map(|s| s.needs_layout).collect::<Vec<_>>();
        assert_eq!(needs_layout, [true, true, true, false]);
    }

    #[test]
    fn dynamic_names_promote_uniform_buffers() {
        let plan = DescriptorLayoutPlan::new(&desc(vec![
            DescriptorDesc::new(
                "DynamicTransforms",
                UpdateFrequency::PerDraw,
                0,
                vk::DescriptorType::UNIFORM_BUFFER,
            ),
            DescriptorDesc::new(
                "dynamicArray",
                UpdateFrequency::PerDraw,
                1,
                vk::DescriptorType::UNIFORM_BUFFER,
            )
            .with_count(2),
        ]))
        .unwrap();

        assert_eq!(
            plan.descriptors[0].descriptor_type,
            vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC
        );
        assert_eq!(plan.descriptors[0].dynamic_index, Some(0));
        assert_eq!(
            plan.descriptors[1].descriptor_type,
            vk::DescriptorType::UNIFORM_BUFFER
        );
        assert_eq!(
            plan.sets[UpdateFrequency::PerDraw.index()].dynamic_descriptor_count,
            1
        );
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let result = DescriptorLayoutPlan::new(&desc(vec![
            DescriptorDesc::new("a", UpdateFrequency::Static, 0, vk::DescriptorType::SAMPLER),
            DescriptorDesc::new("a", UpdateFrequency::PerDraw, 0, vk::DescriptorType::SAMPLER),
        ]));

        assert!(matches!(
            result,
            Err(DescriptorError::DuplicateDescriptor(name)) if name == "a"
        ));
    }

    #[test]
    fn unsupported_types_are_rejected() {
        let result = DescriptorLayoutPlan::new(&desc(vec![DescriptorDesc::new(
            "block",
            UpdateFrequency::Static,
            0,
            vk::DescriptorType::INLINE_UNIFORM_BLOCK,
        )]));

        assert!(matches!(
            result,
            Err(DescriptorError::UnsupportedDescriptorType(_))
        ));
    }

    #[test]
    fn defaults_match_descriptor_kind() {
        assert_eq!(
            DescriptorUpdateData::default_for(vk::DescriptorType::STORAGE_IMAGE),
            DescriptorUpdateData::Image {
                sampler: vk::Sampler::null(),
                image_view: vk::ImageView::null(),
                image_layout: vk::ImageLayout::GENERAL,
            }
        );
        assert_eq!(
            DescriptorUpdateData::default_for(vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC),
            DescriptorUpdateData::Buffer {
                buffer: vk::Buffer::null(),
                offset: 0,
                range: vk::WHOLE_SIZE as vk::DeviceSize,
            }
        );
    }

    #[test]
    fn lookup_by_name() {
        let plan = DescriptorLayoutPlan::new(&desc(vec![DescriptorDesc::new(
            "albedo",
            UpdateFrequency::PerBatch,
            3,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
        )]))
        .unwrap();
        let root = VulkanRootSignature::from_plan(plan, [vk::DescriptorSetLayout::null(); 4]);

        assert_eq!(root.descriptor_index("albedo"), Some(0));
        assert_eq!(root.descriptor("albedo").map(|d| d.binding), Some(3));
        assert!(root.descriptor("normal").is_none());
    }

    #[test]
    fn dynamic_descriptor_count_is_not_limited_to_a_byte() {
        let descriptors = (0..300)
            .map(|i| {
                DescriptorDesc::new(
                    format!("dynamic{}", i),
                    UpdateFrequency::PerDraw,
                    i,
                    vk::DescriptorType::UNIFORM_BUFFER,
                )
            })
            .collect();
        let plan = DescriptorLayoutPlan::new(&desc(descriptors)).unwrap();

        assert_eq!(
            plan.sets[UpdateFrequency::PerDraw.index()].dynamic_descriptor_count,
            300
        );
        assert_eq!(plan.descriptors[299].dynamic_index, Some(299));
    }

    #[test]
    fn failed_layout_creation_releases_earlier_layouts() {
        let plan = DescriptorLayoutPlan::new(&desc(vec![
            DescriptorDesc::new("a", UpdateFrequency::Static, 0, vk::DescriptorType::SAMPLER),
            DescriptorDesc::new("b", UpdateFrequency::PerFrame, 0, vk::DescriptorType::SAMPLER),
            DescriptorDesc::new("c", UpdateFrequency::PerDraw, 0, vk::DescriptorType::SAMPLER),
        ]))
        .unwrap();

        let mut next = 100;
        let mut destroyed = Vec::new();
        let result = plan.create_set_layouts(
            |_| {
                next += 1;
                if next == 103 {
                    Err(vk::ErrorCode::OUT_OF_DEVICE_MEMORY)
                } else {
                    Ok(vk::DescriptorSetLayout::from_raw(next))
                }
            },
            |layout| destroyed.push(layout.as_raw()),
        );

        assert!(result.is_err());
        destroyed.sort();
        assert_eq!(destroyed, [101, 102]);
    }
}
