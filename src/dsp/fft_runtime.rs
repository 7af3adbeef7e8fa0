//! Provider selection, fallback and caching on top of [`super::fft`].

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use serde::Deserialize;

use super::fft::{FftProvider, NativeFftProvider, RustFftProvider};
use crate::error::{Error, Result};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FftProviderKind {
    #[default]
    Native,
    #[serde(alias = "accelerated")]
    RustFft,
    /// A caller-built provider carried by the request.
    Custom,
}

impl FftProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FftProviderKind::Native => "native",
            FftProviderKind::RustFft => "rustfft",
            FftProviderKind::Custom => "custom",
        }
    }
}

impl fmt::Display for FftProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FftProviderKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "native" => Ok(FftProviderKind::Native),
            "rustfft" | "accelerated" => Ok(FftProviderKind::RustFft),
            "custom" => Ok(FftProviderKind::Custom),
            other => Err(Error::unsupported(format!("unknown FFT provider type: {other}"))),
        }
    }
}

#[derive(Clone, Debug)]
pub struct FftProviderRequest {
    pub kind: FftProviderKind,
    pub fft_size: usize,
    pub sample_rate: f64,
    pub enable_profiling: bool,
    /// `None` means: fall back for every kind except `Native`.
    pub fallback_to_native: Option<bool>,
    pub custom: Option<Arc<dyn FftProvider>>,
}

impl FftProviderRequest {
    pub fn new(fft_size: usize, sample_rate: f64) -> Self {
        Self {
            kind: FftProviderKind::Native,
            fft_size,
            sample_rate,
            enable_profiling: false,
            fallback_to_native: None,
            custom: None,
        }
    }

    pub fn with_kind(mut self, kind: FftProviderKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_custom(mut self, provider: Arc<dyn FftProvider>) -> Self {
        self.kind = FftProviderKind::Custom;
        self.custom = Some(provider);
        self
    }

    pub fn falls_back_to_native(&self) -> bool {
        self.fallback_to_native
            .unwrap_or(self.kind != FftProviderKind::Native)
    }

    fn validate(&self) -> Result<()> {
        if !self.sample_rate.is_finite() || self.sample_rate <= 0.0 {
            return Err(Error::invalid_input(format!(
                "sample rate must be positive, got {}",
                self.sample_rate
            )));
        }
        if self.kind == FftProviderKind::Custom && self.custom.is_none() {
            return Err(Error::invalid_input("custom FFT provider requested without an instance"));
        }
        Ok(())
    }
}

/// One construction attempt for a single candidate kind.
#[derive(Clone, Copy, Debug)]
pub struct FftProviderConfig<'a> {
    pub kind: FftProviderKind,
    pub fft_size: usize,
    pub sample_rate: f64,
    pub enable_profiling: bool,
    pub custom: Option<&'a Arc<dyn FftProvider>>,
}

pub trait ProviderResolver {
    fn create_provider(&self, config: &FftProviderConfig<'_>) -> Result<Arc<dyn FftProvider>>;
}

/// Builds the providers that ship with the crate.
#[derive(Clone, Copy, Debug, Default)]
pub struct FftProviderFactory;

impl FftProviderFactory {
    pub fn available_providers() -> &'static [FftProviderKind] {
        &[FftProviderKind::Native, FftProviderKind::RustFft]
    }
}

impl ProviderResolver for FftProviderFactory {
    fn create_provider(&self, config: &FftProviderConfig<'_>) -> Result<Arc<dyn FftProvider>> {
        match config.kind {
            FftProviderKind::Native => Ok(Arc::new(NativeFftProvider::new(
                config.fft_size,
                config.sample_rate,
            )?)),
            FftProviderKind::RustFft => Ok(Arc::new(RustFftProvider::new(
                config.fft_size,
                config.sample_rate,
                config.enable_profiling,
            )?)),
            FftProviderKind::Custom => {
                let provider = config
                    .custom
                    .ok_or_else(|| Error::invalid_input("custom FFT provider missing"))?;
                if provider.size() != config.fft_size {
                    return Err(Error::invalid_input(format!(
                        "custom provider size {} does not match requested {}",
                        provider.size(),
                        config.fft_size
                    )));
                }
                Ok(Arc::clone(provider))
            }
        }
    }
}

pub fn create_fft_provider(request: &FftProviderRequest) -> Result<Arc<dyn FftProvider>> {
    create_fft_provider_with(request, &FftProviderFactory)
}

/// Tries the requested kind, then native when fallback is enabled.
pub fn create_fft_provider_with(
    request: &FftProviderRequest,
    resolver: &dyn ProviderResolver,
) -> Result<Arc<dyn FftProvider>> {
    request.validate()?;

    let mut candidates = vec![request.kind];
    if request.falls_back_to_native() && request.kind != FftProviderKind::Native {
        candidates.push(FftProviderKind::Native);
    }

    let mut last_error = None;
    for kind in candidates {
        let config = FftProviderConfig {
            kind,
            fft_size: request.fft_size,
            sample_rate: request.sample_rate,
            enable_profiling: request.enable_profiling,
            custom: request.custom.as_ref(),
        };
        match resolver.create_provider(&config) {
            Ok(provider) => {
                log::debug!(
                    "created {} FFT provider (size {}, {} Hz)",
                    provider.name(),
                    request.fft_size,
                    request.sample_rate
                );
                return Ok(provider);
            }
            Err(err) => {
                log::warn!("{} FFT provider unavailable: {}", kind, err);
                last_error = Some(err);
            }
        }
    }

    Err(Error::InitializationFailed {
        message: "Failed to create FFT provider".into(),
        source: last_error.map(Box::new),
    })
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
struct RequestKey {
    kind: FftProviderKind,
    fft_size: usize,
    sample_rate_bits: u64,
    enable_profiling: bool,
    fallback_to_native: bool,
    custom: Option<usize>,
}

impl RequestKey {
    fn new(request: &FftProviderRequest) -> Self {
        Self {
            kind: request.kind,
            fft_size: request.fft_size,
            sample_rate_bits: request.sample_rate.to_bits(),
            enable_profiling: request.enable_profiling,
            fallback_to_native: request.falls_back_to_native(),
            custom: request
                .custom
                .as_ref()
                .map(|p| Arc::as_ptr(p) as *const () as usize),
        }
    }
}

/// Providers keyed by request; the cache owns their lifetime.
#[derive(Default)]
pub struct FftProviderCache {
    providers: Mutex<HashMap<RequestKey, Arc<dyn FftProvider>>>,
}

impl FftProviderCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> &'static FftProviderCache {
        static SHARED: OnceLock<FftProviderCache> = OnceLock::new();
        SHARED.get_or_init(FftProviderCache::new)
    }

    pub fn get_or_create(&self, request: &FftProviderRequest) -> Result<Arc<dyn FftProvider>> {
        self.get_or_create_with(request, &FftProviderFactory)
    }

    pub fn get_or_create_with(
        &self,
        request: &FftProviderRequest,
        resolver: &dyn ProviderResolver,
    ) -> Result<Arc<dyn FftProvider>> {
        let key = RequestKey::new(request);
        let mut providers = self.providers.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = providers.get(&key) {
            return Ok(Arc::clone(existing));
        }
        let provider = create_fft_provider_with(request, resolver)?;
        providers.insert(key, Arc::clone(&provider));
        Ok(provider)
    }

    pub fn len(&self) -> usize {
        self.providers.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Disposes every cached provider and empties the cache.
    pub fn clear(&self) {
        let drained: Vec<_> = self
            .providers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, provider)| provider)
            .collect();
        if !drained.is_empty() {
            log::debug!("disposing {} cached FFT providers", drained.len());
        }
        for provider in drained {
            provider.dispose();
        }
    }
}

impl fmt::Debug for FftProviderCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FftProviderCache")
            .field("len", &self.len())
            .finish()
    }
}

pub fn clear_shared_fft_provider_cache() {
    FftProviderCache::shared().clear();
}

/// A provider borrowed from a cache, or owned outright.
///
/// Dropping (or releasing) an owned handle disposes its provider; a cached
/// provider stays alive until its cache is cleared.
pub struct FftProviderHandle {
    provider: Arc<dyn FftProvider>,
    owned: bool,
}

impl FftProviderHandle {
    pub fn provider(&self) -> &Arc<dyn FftProvider> {
        &self.provider
    }

    pub fn is_cached(&self) -> bool {
        !self.owned
    }

    pub fn release(self) {}
}

impl Drop for FftProviderHandle {
    fn drop(&mut self) {
        if self.owned {
            self.provider.dispose();
        }
    }
}

impl fmt::Debug for FftProviderHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FftProviderHandle")
            .field("provider", &self.provider)
            .field("owned", &self.owned)
            .finish()
    }
}

pub fn acquire_fft_provider(
    request: &FftProviderRequest,
    cache: Option<&FftProviderCache>,
) -> Result<FftProviderHandle> {
    match cache {
        Some(cache) => Ok(FftProviderHandle {
            provider: cache.get_or_create(request)?,
            owned: false,
        }),
        None => Ok(FftProviderHandle {
            provider: create_fft_provider(request)?,
            owned: true,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::error::Error as _;

    /// Refuses every accelerated request, delegates the rest.
    struct RefusingResolver {
        attempts: RefCell<Vec<FftProviderKind>>,
    }

    impl RefusingResolver {
        fn new() -> Self {
            Self { attempts: RefCell::new(Vec::new()) }
        }
    }

    impl ProviderResolver for RefusingResolver {
        fn create_provider(&self, config: &FftProviderConfig<'_>) -> Result<Arc<dyn FftProvider>> {
            self.attempts.borrow_mut().push(config.kind);
            if config.kind == FftProviderKind::RustFft {
                return Err(Error::unsupported("backend offline"));
            }
            FftProviderFactory.create_provider(config)
        }
    }

    #[test]
    fn falls_back_to_native_by_default() {
        let resolver = RefusingResolver::new();
        let request = FftProviderRequest::new(256, 48_000.0).with_kind(FftProviderKind::RustFft);
        let provider = create_fft_provider_with(&request, &resolver).unwrap();
        assert_eq!(provider.name(), NativeFftProvider::NAME);
        assert_eq!(
            *resolver.attempts.borrow(),
            vec![FftProviderKind::RustFft, FftProviderKind::Native]
        );
    }

    #[test]
    fn disabled_fallback_surfaces_initialization_failure() {
        let resolver = RefusingResolver::new();
        let mut request = FftProviderRequest::new(256, 48_000.0).with_kind(FftProviderKind::RustFft);
        request.fallback_to_native = Some(false);

        let err = create_fft_provider_with(&request, &resolver).unwrap_err();
        assert_eq!(err.code(), "INITIALIZATION_FAILED");
        assert!(err.source().unwrap().to_string().contains("backend offline"));
        assert_eq!(resolver.attempts.borrow().len(), 1);
    }

    #[test]
    fn exhausted_chain_carries_last_cause() {
        let resolver = RefusingResolver::new();
        // Native rejects the size too, so both candidates fail.
        let request = FftProviderRequest::new(1000, 48_000.0).with_kind(FftProviderKind::RustFft);
        let err = create_fft_provider_with(&request, &resolver).unwrap_err();
        match err {
            Error::InitializationFailed { source: Some(cause), .. } => {
                assert_eq!(cause.code(), "INVALID_INPUT");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn native_request_never_retries() {
        let resolver = RefusingResolver::new();
        let request = FftProviderRequest::new(100, 48_000.0);
        assert!(create_fft_provider_with(&request, &resolver).is_err());
        assert_eq!(*resolver.attempts.borrow(), vec![FftProviderKind::Native]);
    }

    #[test]
    fn builtin_factory_builds_rustfft() {
        let request = FftProviderRequest::new(1000, 44_100.0).with_kind(FftProviderKind::RustFft);
        let provider = create_fft_provider(&request).unwrap();
        assert_eq!(provider.name(), RustFftProvider::NAME);
        assert_eq!(provider.size(), 1000);
    }

    #[test]
    fn custom_provider_is_passed_through() {
        let custom: Arc<dyn FftProvider> = Arc::new(NativeFftProvider::new(64, 8_000.0).unwrap());
        let request = FftProviderRequest::new(64, 8_000.0).with_custom(Arc::clone(&custom));
        let provider = create_fft_provider(&request).unwrap();
        assert!(Arc::ptr_eq(&provider, &custom));

        let missing = FftProviderRequest::new(64, 8_000.0).with_kind(FftProviderKind::Custom);
        assert_eq!(create_fft_provider(&missing).unwrap_err().code(), "INVALID_INPUT");
    }

    #[test]
    fn invalid_sample_rate_fails_before_construction() {
        let resolver = RefusingResolver::new();
        let request = FftProviderRequest::new(64, f64::NAN);
        assert_eq!(
            create_fft_provider_with(&request, &resolver).unwrap_err().code(),
            "INVALID_INPUT"
        );
        assert!(resolver.attempts.borrow().is_empty());
    }

    #[test]
    fn cache_returns_same_instance_and_clear_disposes() {
        let cache = FftProviderCache::new();
        let request = FftProviderRequest::new(128, 48_000.0);
        let first = cache.get_or_create(&request).unwrap();
        let second = cache.get_or_create(&request).unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        let other = cache
            .get_or_create(&FftProviderRequest::new(128, 44_100.0))
            .unwrap();
        assert!(!Arc::ptr_eq(&first, &other));
        assert_eq!(cache.len(), 2);

        cache.clear();
        assert!(cache.is_empty());
        assert!(first.fft(&[0.0; 128]).is_err());
        assert!(other.fft(&[0.0; 128]).is_err());
    }

    #[test]
    fn handle_release_only_disposes_owned_providers() {
        let cache = FftProviderCache::new();
        let request = FftProviderRequest::new(32, 48_000.0);

        let cached = acquire_fft_provider(&request, Some(&cache)).unwrap();
        let provider = Arc::clone(cached.provider());
        assert!(cached.is_cached());
        cached.release();
        assert!(provider.fft(&[0.0; 32]).is_ok());

        let owned = acquire_fft_provider(&request, None).unwrap();
        let provider = Arc::clone(owned.provider());
        owned.release();
        assert!(provider.fft(&[0.0; 32]).is_err());
    }

    #[test]
    fn kinds_parse_from_names() {
        assert_eq!("RustFFT".parse::<FftProviderKind>().unwrap(), FftProviderKind::RustFft);
        assert_eq!("native".parse::<FftProviderKind>().unwrap(), FftProviderKind::Native);
        assert_eq!("webgpu".parse::<FftProviderKind>().unwrap_err().code(), "UNSUPPORTED_FORMAT");
        assert_eq!(FftProviderFactory::available_providers().len(), 2);
    }
}
