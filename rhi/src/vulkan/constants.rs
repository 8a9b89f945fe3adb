use vulkanalia::{vk, Version};

pub const PORTABILITY_MACOS_VERSION: Version = Version::new(1, 3, 216);
pub const VALIDATION_ENABLED: bool = cfg!(debug_assertions);
pub const VALIDATION_LAYER: vk::ExtensionName =
    vk::ExtensionName::from_bytes(b"VK_LAYER_KHRONOS_validation");

pub const MIN_API_VERSION: u32 = (1 << 22) | (2 << 12);

pub const INFINITE_TIMEOUT: u64 = u64::MAX;

pub const MAX_DESCRIPTOR_SETS: usize = 4;

pub const DEFAULT_DESCRIPTOR_SETS_PER_POOL: u32 = 64;

/// Upper bound on any single type's descriptor count in one backing pool.
pub const MAX_POOL_DESCRIPTORS_PER_TYPE: u32 = 1 << 16;

pub const DEFAULT_CLEAR_COLOR: [f32; 4] = [0.1, 0.1, 0.1, 1.0];

pub const OPTIMAL_SURFACE_FORMAT: vk::Format = vk::Format::B8G8R8A8_UNORM;
pub const OPTIMAL_COLOR_SPACE: vk::ColorSpaceKHR = vk::ColorSpaceKHR::SRGB_NONLINEAR;

pub const DEPTH_FORMAT_CANDIDATES: [vk::Format; 5] = [
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D32_SFLOAT,
    vk::Format::D24_UNORM_S8_UINT,
    vk::Format::D16_UNORM_S8_UINT,
    vk::Format::D16_UNORM,
];

/// Device extensions that together make a GPU ray tracing capable. The old provisional
/// `VK_KHR_ray_tracing` was split into the pipeline and acceleration structure pair.
pub const RAY_TRACING_EXTENSIONS: [vk::ExtensionName; 4] = [
    vk::KHR_RAY_TRACING_PIPELINE_EXTENSION.name,
    vk::KHR_ACCELERATION_STRUCTURE_EXTENSION.name,
    vk::KHR_DEFERRED_HOST_OPERATIONS_EXTENSION.name,
    vk::KHR_PIPELINE_LIBRARY_EXTENSION.name,
];

pub const DESCRIPTOR_POOL_SIZES: [(vk::DescriptorType, u32); 11] = [
    (vk::DescriptorType::SAMPLER, 1024),
    (vk::DescriptorType::COMBINED_IMAGE_SAMPLER, 1),
    (vk::DescriptorType::SAMPLED_IMAGE, 8192),
    (vk::DescriptorType::STORAGE_IMAGE, 1024),
    (vk::DescriptorType::UNIFORM_TEXEL_BUFFER, 1024),
    (vk::DescriptorType::STORAGE_TEXEL_BUFFER, 1024),
    (vk::DescriptorType::UNIFORM_BUFFER, 8192),
    (vk::DescriptorType::STORAGE_BUFFER, 1024),
    (vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC, 1024),
    (vk::DescriptorType::STORAGE_BUFFER_DYNAMIC, 1),
    (vk::DescriptorType::INPUT_ATTACHMENT, 1),
];

pub const ACCELERATION_STRUCTURE_POOL_SIZE: u32 = 1024;
