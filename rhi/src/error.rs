use log::*;
use thiserror::Error;
use vulkanalia::vk;

use crate::renderer::RenderApi;
use crate::vulkan::root_signature::UpdateFrequency;

#[derive(Debug, Error)]
pub enum RhiError {
    #[error("No suitable GPU found: {0}")]
    UnsupportedDevice(String),
    #[error("The {0:?} render API is not supported.")]
    UnsupportedApi(RenderApi),
}

#[derive(Debug, Error)]
pub enum DescriptorError {
    #[error("Root signature has no descriptor set layout for {0:?}.")]
    NullLayout(UpdateFrequency),
    #[error("Descriptor set {frequency:?} has {count} dynamic descriptors, at most one is allowed.")]
    TooManyDynamicDescriptors {
        frequency: UpdateFrequency,
        count: u32,
    },
    #[error("Descriptor set allocation failed on a freshly created pool: {0}")]
    PoolExhausted(vk::ErrorCode),
    #[error("Descriptor `{0}` is declared twice.")]
    DuplicateDescriptor(String),
    #[error("Descriptor type {0:?} cannot be placed in a root signature.")]
    UnsupportedDescriptorType(vk::DescriptorType),
    #[error("Unknown descriptor `{0}`.")]
    UnknownDescriptor(String),
    #[error("Descriptor `{name}` belongs to {actual:?}, not {expected:?}.")]
    FrequencyMismatch {
        name: String,
        expected: UpdateFrequency,
        actual: UpdateFrequency,
    },
    #[error("Descriptor `{name}` of type {descriptor_type:?} cannot be bound to this resource.")]
    ResourceMismatch {
        name: String,
        descriptor_type: vk::DescriptorType,
    },
    #[error("Descriptor `{name}` holds {capacity} elements, {requested} were provided.")]
    ArrayOverflow {
        name: String,
        capacity: u32,
        requested: usize,
    },
    #[error("Dynamic offset {offset} of descriptor `{name}` does not fit in 32 bits.")]
    DynamicOffsetOutOfRange { name: String, offset: u64 },
    #[error("Descriptor set index {index} is out of range ({max_sets} sets).")]
    SetIndexOutOfRange { index: usize, max_sets: u32 },
}

pub fn report_fatal(error: &anyhow::Error) {
    error!("Fatal: {:#}", error);
    eprintln!("Error: {:#}", error);
    for cause in error.chain().skip(1) {
        debug!("Caused by: {}", cause);
    }
}
