use anyhow::{anyhow, Result};
use log::*;
use std::collections::{BTreeMap, HashSet};
use std::fmt::Write as _;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use vulkanalia::prelude::v1_0::*;
use vulkanalia::vk::{InstanceV1_1, KhrSurfaceExtension};

use super::{
    constants, device::QueueFamilyIndices, instance::VulkanInstance,
    surface::choose_surface_format,
};
use crate::error::RhiError;
use crate::window::PresentationWindow;

pub const DISCRETE_GPU_SCORE: u64 = 5000;
pub const INTEGRATED_GPU_SCORE: u64 = 2500;
pub const OPTIMAL_FORMAT_SCORE: u64 = 100;
pub const RAY_TRACING_SCORE: u64 = 2000;
pub const FEATURE_SCORE: u64 = 1000;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SuitabilityError {
    #[error("Missing graphics queue family.")]
    NoGraphicsQueue,
    #[error("Surface creation failed.")]
    SurfaceCreation,
    #[error("Surface reports no formats.")]
    NoSurfaceFormats,
    #[error("Surface reports no present modes.")]
    NoPresentModes,
    #[error("Device type {0:?} is neither discrete nor integrated.")]
    DeviceType(vk::PhysicalDeviceType),
    #[error("Vulkan {} is older than the required 1.2.", version_string(.0))]
    ApiVersion(u32),
    #[error("Missing {} extension.", vk::KHR_SWAPCHAIN_EXTENSION.name)]
    MissingSwapchain,
    #[error("Missing present queue family.")]
    NoPresentQueue,
}

pub fn version_string(version: &u32) -> String {
    let version = *version;
    format!(
        "{}.{}.{}",
        (version >> 22) & 0x7f,
        (version >> 12) & 0x3ff,
        version & 0xfff
    )
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RatingMode {
    Windowed,
    Headless,
}

#[derive(Clone, Debug, Default)]
pub struct SurfaceSupport {
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
    pub present_family: Option<u32>,
}

#[derive(Clone, Debug, Default)]
pub struct PhysicalDeviceInfo {
    pub handle: vk::PhysicalDevice,
    pub name: String,
    pub uuid: [u8; 16],
    pub properties: vk::PhysicalDeviceProperties,
    pub features: vk::PhysicalDeviceFeatures,
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    pub queue_families: Vec<vk::QueueFamilyProperties>,
    pub extensions: HashSet<vk::ExtensionName>,
    pub surface: Option<SurfaceSupport>,
}

impl PhysicalDeviceInfo {
    pub unsafe fn query(
        instance: &VulkanInstance,
        physical_device: vk::PhysicalDevice,
        window: Option<&dyn PresentationWindow>,
    ) -> Result<Self> {
        let vk_instance = &instance.vk_instance;

        let properties = vk_instance.get_physical_device_properties(physical_device);
        let features = vk_instance.get_physical_device_features(physical_device);
        let memory_properties = vk_instance.get_physical_device_memory_properties(physical_device);
        let queue_families =
            vk_instance.get_physical_device_queue_family_properties(physical_device);
        let extensions = vk_instance
            .enumerate_device_extension_properties(physical_device, None)?
            .iter()
            .map(|e| e.extension_name)
            .collect::<HashSet<_>>();

        let mut uuid = [0; 16];
        if properties.api_version >= vk::make_version(1, 1, 0) {
            let mut id_properties = vk::PhysicalDeviceIDProperties::builder();
            let mut properties2 =
                vk::PhysicalDeviceProperties2::builder().push_next(&mut id_properties);
            vk_instance.get_physical_device_properties2(physical_device, &mut properties2);
            uuid.copy_from_slice(&id_properties.device_uuid[..]);
        }

        let surface = match window {
            Some(window) if QueueFamilyIndices::first_graphics(&queue_families).is_some() => {
                query_surface_support(instance, physical_device, queue_families.len(), window)
            }
            _ => None,
        };

        Ok(Self {
            handle: physical_device,
            name: properties.device_name.to_string(),
            uuid,
            properties,
            features,
            memory_properties,
            queue_families,
            extensions,
            surface,
        })
    }

    pub fn uuid_string(&self) -> String {
        self.uuid.iter().fold(String::with_capacity(32), |mut s, b| {
            let _ = write!(s, "{:02x}", b);
            s
        })
    }

    pub fn supports_extension(&self, extension: &vk::ExtensionName) -> bool {
        self.extensions.contains(extension)
    }

    pub fn supports_ray_tracing(&self) -> bool {
        constants::RAY_TRACING_EXTENSIONS
            .iter()
            .all(|e| self.supports_extension(e))
    }
}

unsafe fn query_surface_support(
    instance: &VulkanInstance,
    physical_device: vk::PhysicalDevice,
    family_count: usize,
    window: &dyn PresentationWindow,
) -> Option<SurfaceSupport> {
    let vk_instance = &instance.vk_instance;
    let surface = match window.create_surface(vk_instance) {
        Ok(surface) => surface,
        Err(error) => {
            warn!("Failed to create a temporary surface: {}", error);
            return None;
        }
    };

    let formats = vk_instance
        .get_physical_device_surface_formats_khr(physical_device, surface)
        .unwrap_or_default();
    let present_modes = vk_instance
        .get_physical_device_surface_present_modes_khr(physical_device, surface)
        .unwrap_or_default();
    let present_family = (0..family_count as u32).find(|&index| {
        vk_instance
            .get_physical_device_surface_support_khr(physical_device, index, surface)
            .unwrap_or(false)
    });

    vk_instance.destroy_surface_khr(surface, None);

    Some(SurfaceSupport {
        formats,
        present_modes,
        present_family,
    })
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Rating {
    pub score: u64,
    pub ray_tracing: bool,
}

/// Scores a candidate. Mandatory requirements are checked first and reject the device,
/// optional capabilities add to the score.
pub fn rate_physical_device(
    info: &PhysicalDeviceInfo,
    mode: RatingMode,
) -> Result<Rating, SuitabilityError> {
    let windowed = mode == RatingMode::Windowed;
    let mut score = 0;

    if QueueFamilyIndices::first_graphics(&info.queue_families).is_none() {
        return Err(SuitabilityError::NoGraphicsQueue);
    }

    let surface = if windowed {
        let surface = info
            .surface
            .as_ref()
            .ok_or(SuitabilityError::SurfaceCreation)?;
        if surface.formats.is_empty() {
            return Err(SuitabilityError::NoSurfaceFormats);
        }
        if surface.present_modes.is_empty() {
            return Err(SuitabilityError::NoPresentModes);
        }
        Some(surface)
    } else {
        None
    };

    score += match info.properties.device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => DISCRETE_GPU_SCORE,
        vk::PhysicalDeviceType::INTEGRATED_GPU => INTEGRATED_GPU_SCORE,
        other if windowed => return Err(SuitabilityError::DeviceType(other)),
        _ => 0,
    };

    if info.properties.api_version < constants::MIN_API_VERSION {
        return Err(SuitabilityError::ApiVersion(info.properties.api_version));
    }

    if let Some(surface) = surface {
        if !info.supports_extension(&vk::KHR_SWAPCHAIN_EXTENSION.name) {
            return Err(SuitabilityError::MissingSwapchain);
        }
        if surface.present_family.is_none() {
            return Err(SuitabilityError::NoPresentQueue);
        }
        let optimal = choose_surface_format(&surface.formats).map_or(false, |f| {
            f.format == constants::OPTIMAL_SURFACE_FORMAT
                && f.color_space == constants::OPTIMAL_COLOR_SPACE
        });
        if optimal {
            score += OPTIMAL_FORMAT_SCORE;
        }
    }

    let ray_tracing = info.supports_ray_tracing();
    if ray_tracing {
        score += RAY_TRACING_SCORE;
    }

    let memory = &info.memory_properties;
    score += memory.memory_heaps[..memory.memory_heap_count as usize]
        .iter()
        .map(|heap| (heap.size as f64 / 1e9 * 100.0) as u64)
        .sum::<u64>();

    let limits = &info.properties.limits;
    score += u64::from(limits.max_image_dimension_2d);
    score += u64::from(limits.max_image_dimension_cube);

    let features = &info.features;
    score += [
        features.fill_mode_non_solid,
        features.geometry_shader,
        features.tessellation_shader,
        features.sampler_anisotropy,
    ]
    .iter()
    .filter(|&&f| f == vk::TRUE)
    .count() as u64
        * FEATURE_SCORE;

    Ok(Rating { score, ray_tracing })
}

#[derive(Clone, Debug)]
pub struct RatedPhysicalDevice {
    pub score: u64,
    pub ray_tracing: bool,
    pub info: PhysicalDeviceInfo,
}

#[derive(Clone, Debug, Default)]
pub struct DeviceRatings {
    entries: BTreeMap<u64, Vec<RatedPhysicalDevice>>,
}

impl DeviceRatings {
    pub fn insert(&mut self, device: RatedPhysicalDevice) {
        self.entries.entry(device.score).or_default().push(device);
    }

    pub fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &RatedPhysicalDevice> {
        self.entries.values().flatten()
    }

    pub fn best(&self) -> Option<&RatedPhysicalDevice> {
        self.iter().next_back()
    }

    pub fn find(&self, selector: &str) -> Option<&RatedPhysicalDevice> {
        self.iter().rev().find(|d| {
            d.info.uuid_string().eq_ignore_ascii_case(selector) || d.info.name == selector
        })
    }
}

pub fn rate_physical_devices(candidates: Vec<PhysicalDeviceInfo>, mode: RatingMode) -> DeviceRatings {
    let mut ratings = DeviceRatings::default();

    for info in candidates {
        match rate_physical_device(&info, mode) {
            Ok(rating) => {
                debug!(
                    "Physical device (`{}`) scored {}{}.",
                    info.name,
                    rating.score,
                    if rating.ray_tracing { ", ray tracing capable" } else { "" }
                );
                ratings.insert(RatedPhysicalDevice {
                    score: rating.score,
                    ray_tracing: rating.ray_tracing,
                    info,
                });
            }
            Err(error) => error!("Skipping physical device (`{}`): {}", info.name, error),
        }
    }

    ratings
}

pub trait CandidateSource {
    fn instance(&self) -> vk::Instance;

    fn mode(&self) -> RatingMode;

    unsafe fn enumerate(&self) -> Result<Vec<PhysicalDeviceInfo>>;
}

pub struct VulkanCandidateSource<'a> {
    instance: &'a VulkanInstance,
    window: Option<&'a dyn PresentationWindow>,
}

impl<'a> VulkanCandidateSource<'a> {
    pub fn new(instance: &'a VulkanInstance, window: Option<&'a dyn PresentationWindow>) -> Self {
        Self { instance, window }
    }
}

impl CandidateSource for VulkanCandidateSource<'_> {
    fn instance(&self) -> vk::Instance {
        self.instance.vk_instance.handle()
    }

    fn mode(&self) -> RatingMode {
        if self.window.is_some() {
            RatingMode::Windowed
        } else {
            RatingMode::Headless
        }
    }

    unsafe fn enumerate(&self) -> Result<Vec<PhysicalDeviceInfo>> {
        self.instance
            .vk_instance
            .enumerate_physical_devices()?
            .into_iter()
            .map(|physical_device| PhysicalDeviceInfo::query(self.instance, physical_device, self.window))
            .collect()
    }
}

#[derive(Debug, Default)]
pub struct DeviceRatingCache {
    instance: Option<vk::Instance>,
    ratings: Option<Arc<DeviceRatings>>,
}

impl DeviceRatingCache {
    pub const fn new() -> Self {
        Self {
            instance: None,
            ratings: None,
        }
    }

    pub unsafe fn get_or_rate<S>(&mut self, source: &S) -> Result<Arc<DeviceRatings>>
    where
        S: CandidateSource + ?Sized,
    {
        let instance = source.instance();
        if self.instance != Some(instance) {
            self.invalidate();
        }

        if let Some(ratings) = &self.ratings {
            return Ok(Arc::clone(ratings));
        }

        let ratings = Arc::new(rate_physical_devices(source.enumerate()?, source.mode()));
        if !ratings.is_empty() {
            self.instance = Some(instance);
            self.ratings = Some(Arc::clone(&ratings));
        }
        Ok(ratings)
    }

    pub fn invalidate(&mut self) {
        self.instance = None;
        self.ratings = None;
    }
}

static RATING_CACHE: Mutex<DeviceRatingCache> = Mutex::new(DeviceRatingCache::new());

pub unsafe fn available_graphic_physical_devices<S>(source: &S) -> Result<Arc<DeviceRatings>>
where
    S: CandidateSource + ?Sized,
{
    RATING_CACHE
        .lock()
        .map_err(|_| anyhow!("Physical device rating cache poisoned."))?
        .get_or_rate(source)
}

pub fn invalidate_rated_physical_devices() {
    if let Ok(mut cache) = RATING_CACHE.lock() {
        cache.invalidate();
    }
}

#[derive(Clone, Debug)]
pub struct PhysicalDevice {
    info: PhysicalDeviceInfo,
    score: u64,
    ray_tracing: bool,
    queue_families: QueueFamilyIndices,
}

impl PhysicalDevice {
    pub fn select(ratings: &DeviceRatings, preferred: Option<&str>) -> Result<Self> {
        let preferred_device = preferred.and_then(|selector| {
            let found = ratings.find(selector);
            if found.is_none() {
                warn!("Preferred GPU `{}` is not available, using the best rated one.", selector);
            }
            found
        });

        let rated = preferred_device
            .or_else(|| ratings.best())
            .ok_or_else(|| {
                RhiError::UnsupportedDevice(
                    "no physical device meets the renderer's requirements".to_string(),
                )
            })?;

        info!(
            "Selected physical device (`{}`, score {}, UUID {}).",
            rated.info.name,
            rated.score,
            rated.info.uuid_string()
        );

        Ok(Self::from_rating(rated))
    }

    pub fn from_rating(rated: &RatedPhysicalDevice) -> Self {
        let graphics = QueueFamilyIndices::first_graphics(&rated.info.queue_families);
        Self {
            info: rated.info.clone(),
            score: rated.score,
            ray_tracing: rated.ray_tracing,
            queue_families: QueueFamilyIndices {
                graphics,
                ..QueueFamilyIndices::resolve(&rated.info.queue_families, |_| Ok(false))
                    .unwrap_or_default()
            },
        }
    }

    pub fn handle(&self) -> vk::PhysicalDevice {
        self.info.handle
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn uuid(&self) -> [u8; 16] {
        self.info.uuid
    }

    pub fn score(&self) -> u64 {
        self.score
    }

    pub fn properties(&self) -> &vk::PhysicalDeviceProperties {
        &self.info.properties
    }

    pub fn limits(&self) -> &vk::PhysicalDeviceLimits {
        &self.info.properties.limits
    }

    pub fn features(&self) -> &vk::PhysicalDeviceFeatures {
        &self.info.features
    }

    pub fn memory_properties(&self) -> &vk::PhysicalDeviceMemoryProperties {
        &self.info.memory_properties
    }

    pub fn queue_families(&self) -> &[vk::QueueFamilyProperties] {
        &self.info.queue_families
    }

    pub fn queue_family_indices(&self) -> &QueueFamilyIndices {
        &self.queue_families
    }

    pub fn set_queue_family_indices(&mut self, indices: QueueFamilyIndices) {
        self.queue_families = indices;
    }

    pub fn is_extension_supported(&self, extension: &vk::ExtensionName) -> bool {
        let supported = self.info.supports_extension(extension);
        if !supported {
            warn!("Device extension `{}` is not supported by `{}`.", extension, self.info.name);
        }
        supported
    }

    pub fn is_ray_tracing_supported(&self) -> bool {
        self.ray_tracing
    }

    pub unsafe fn format_properties(
        &self,
        instance: &VulkanInstance,
        format: vk::Format,
    ) -> vk::FormatProperties {
        instance
            .vk_instance
            .get_physical_device_format_properties(self.info.handle, format)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use vulkanalia::vk::Handle;

    fn candidate(name: &str, device_type: vk::PhysicalDeviceType) -> PhysicalDeviceInfo {
        let mut memory_properties = vk::PhysicalDeviceMemoryProperties::default();
        memory_properties.memory_heap_count = 1;
        memory_properties.memory_heaps[0].size = 4_000_000_000;

        PhysicalDeviceInfo {
            handle: vk::PhysicalDevice::from_raw(name.len()),
            name: name.to_string(),
            properties: vk::PhysicalDeviceProperties {
                device_type,
                api_version: vk::make_version(1, 3, 0),
                limits: vk::PhysicalDeviceLimits {
                    max_image_dimension_2d: 16384,
                    max_image_dimension_cube: 16384,
                    ..Default::default()
                },
                ..Default::default()
            },
            memory_properties,
            queue_families: vec![vk::QueueFamilyProperties {
                queue_flags: vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE,
                queue_count: 1,
                ..Default::default()
            }],
            extensions: [vk::KHR_SWAPCHAIN_EXTENSION.name].into_iter().collect(),
            surface: Some(SurfaceSupport {
                formats: vec![vk::SurfaceFormatKHR {
                    format: vk::Format::B8G8R8A8_UNORM,
                    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
                }],
                present_modes: vec![vk::PresentModeKHR::FIFO],
                present_family: Some(0),
            }),
            ..Default::default()
        }
    }

    // 5000 type + 100 format + 400 memory + 32768 image dimensions.
    const DISCRETE_BASELINE: u64 = 38268;

    #[test]
    fn scores_baseline_discrete_gpu() {
        let info = candidate("discrete", vk::PhysicalDeviceType::DISCRETE_GPU);
        let rating = rate_physical_device(&info, RatingMode::Windowed).unwrap();
        assert_eq!(rating, Rating { score: DISCRETE_BASELINE, ray_tracing: false });
    }

    #[test]
    fn features_and_ray_tracing_add_to_score() {
        let mut info = candidate("discrete", vk::PhysicalDeviceType::DISCRETE_GPU);
        info.features.sampler_anisotropy = vk::TRUE;
        info.features.geometry_shader = vk::TRUE;
        info.extensions.extend(constants::RAY_TRACING_EXTENSIONS);

        let rating = rate_physical_device(&info, RatingMode::Windowed).unwrap();

        assert!(rating.ray_tracing);
        assert_eq!(rating.score, DISCRETE_BASELINE + 2 * FEATURE_SCORE + RAY_TRACING_SCORE);
    }

    #[test]
    fn optimal_format_bonus_needs_bgra_srgb_nonlinear() {
        let mut info = candidate("discrete", vk::PhysicalDeviceType::DISCRETE_GPU);
        let rgba = vk::SurfaceFormatKHR {
            format: vk::Format::R8G8B8A8_SRGB,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
        if let Some(surface) = info.surface.as_mut() {
            surface.formats.insert(0, rgba);
        }
        let rating = rate_physical_device(&info, RatingMode::Windowed).unwrap();
        assert_eq!(rating.score, DISCRETE_BASELINE);

        if let Some(surface) = info.surface.as_mut() {
            surface.formats = vec![rgba];
        }

        let rating = rate_physical_device(&info, RatingMode::Windowed).unwrap();
        assert_eq!(rating.score, DISCRETE_BASELINE - OPTIMAL_FORMAT_SCORE);
    }

    #[test]
    fn rejects_unsuitable_devices() {
        let base = candidate("gpu", vk::PhysicalDeviceType::DISCRETE_GPU);
        let reject = |f: &dyn Fn(&mut PhysicalDeviceInfo)| {
            let mut info = base.clone();
            f(&mut info);
            rate_physical_device(&info, RatingMode::Windowed).unwrap_err()
        };

        assert_eq!(reject(&|i| i.queue_families.clear()), SuitabilityError::NoGraphicsQueue);
        assert_eq!(reject(&|i| i.surface = None), SuitabilityError::SurfaceCreation);
        assert_eq!(
            reject(&|i| i.surface.as_mut().unwrap().formats.clear()),
            SuitabilityError::NoSurfaceFormats
        );
        assert_eq!(
            reject(&|i| i.surface.as_mut().unwrap().present_modes.clear()),
            SuitabilityError::NoPresentModes
        );
        assert_eq!(
            reject(&|i| i.properties.device_type = vk::PhysicalDeviceType::CPU),
            SuitabilityError::DeviceType(vk::PhysicalDeviceType::CPU)
        );
        assert_eq!(
            reject(&|i| i.properties.api_version = vk::make_version(1, 1, 0)),
            SuitabilityError::ApiVersion(vk::make_version(1, 1, 0))
        );
        assert_eq!(reject(&|i| i.extensions.clear()), SuitabilityError::MissingSwapchain);
        assert_eq!(
            reject(&|i| i.surface.as_mut().unwrap().present_family = None),
            SuitabilityError::NoPresentQueue
        );
    }

    #[test]
    fn headless_skips_surface_requirements() {
        let mut info = candidate("software", vk::PhysicalDeviceType::CPU);
        info.surface = None;
        info.extensions.clear();

        let rating = rate_physical_device(&info, RatingMode::Headless).unwrap();
        assert_eq!(rating.score, DISCRETE_BASELINE - DISCRETE_GPU_SCORE - OPTIMAL_FORMAT_SCORE);
    }

    #[test]
    fn ratings_order_by_score_and_keep_ties_in_enumeration_order() {
        let mut first = candidate("first", vk::PhysicalDeviceType::INTEGRATED_GPU);
        first.handle = vk::PhysicalDevice::from_raw(1);
        let mut second = first.clone();
        second.handle = vk::PhysicalDevice::from_raw(2);
        let mut low = candidate("low", vk::PhysicalDeviceType::INTEGRATED_GPU);
        low.properties.limits.max_image_dimension_2d = 4096;

        let ratings = rate_physical_devices(vec![first, low, second], RatingMode::Windowed);

        assert_eq!(ratings.len(), 3);
        let names = ratings.iter().map(|d| d.info.name.as_str()).collect::<Vec<_>>();
        assert_eq!(names, ["low", "first", "first"]);
        assert_eq!(ratings.best().unwrap().info.handle, vk::PhysicalDevice::from_raw(2));
    }

    #[test]
    fn selects_preferred_device_by_name_or_uuid() {
        let mut integrated = candidate("integrated", vk::PhysicalDeviceType::INTEGRATED_GPU);
        integrated.uuid = [0xab; 16];
        let discrete = candidate("discrete", vk::PhysicalDeviceType::DISCRETE_GPU);
        let ratings = rate_physical_devices(vec![integrated, discrete], RatingMode::Windowed);

        assert_eq!(PhysicalDevice::select(&ratings, None).unwrap().name(), "discrete");
        assert_eq!(
            PhysicalDevice::select(&ratings, Some("integrated")).unwrap().name(),
            "integrated"
        );
        assert_eq!(
            PhysicalDevice::select(&ratings, Some(&"AB".repeat(16))).unwrap().name(),
            "integrated"
        );
        assert_eq!(PhysicalDevice::select(&ratings, Some("missing")).unwrap().name(), "discrete");
    }

    #[test]
    fn empty_ratings_are_fatal() {
        let error = PhysicalDevice::select(&DeviceRatings::default(), None).unwrap_err();
        assert!(matches!(
            error.downcast_ref::<RhiError>(),
            Some(RhiError::UnsupportedDevice(_))
        ));
    }

    struct CountingSource {
        instance: vk::Instance,
        candidates: Vec<PhysicalDeviceInfo>,
        calls: Cell<usize>,
    }

    impl CandidateSource for CountingSource {
        fn instance(&self) -> vk::Instance {
            self.instance
        }

        fn mode(&self) -> RatingMode {
            RatingMode::Windowed
        }

        unsafe fn enumerate(&self) -> Result<Vec<PhysicalDeviceInfo>> {
            self.calls.set(self.calls.get() + 1);
            Ok(self.candidates.clone())
        }
    }

    #[test]
    fn cache_rates_once_per_instance() {
        let mut source = CountingSource {
            instance: vk::Instance::from_raw(1),
            candidates: vec![candidate("gpu", vk::PhysicalDeviceType::DISCRETE_GPU)],
            calls: Cell::new(0),
        };
        let mut cache = DeviceRatingCache::new();

        let first = unsafe { cache.get_or_rate(&source) }.unwrap();
        let second = unsafe { cache.get_or_rate(&source) }.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(source.calls.get(), 1);

        source.instance = vk::Instance::from_raw(2);
        let third = unsafe { cache.get_or_rate(&source) }.unwrap();
        assert!(!Arc::ptr_eq(&first, &third));
        assert_eq!(source.calls.get(), 2);

        cache.invalidate();
        unsafe { cache.get_or_rate(&source) }.unwrap();
        assert_eq!(source.calls.get(), 3);
    }

    #[test]
    fn cache_does_not_keep_empty_results() {
        let source = CountingSource {
            instance: vk::Instance::from_raw(1),
            candidates: vec![],
            calls: Cell::new(0),
        };
        let mut cache = DeviceRatingCache::new();

        assert!(unsafe { cache.get_or_rate(&source) }.unwrap().is_empty());
        assert!(unsafe { cache.get_or_rate(&source) }.unwrap().is_empty());
        assert_eq!(source.calls.get(), 2);
    }
}
