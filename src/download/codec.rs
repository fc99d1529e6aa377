//! Song codecs and the fallback ladder between them.
//!
//! Premium codecs are not available for every track, and most of them can only
//! be decrypted when the external decrypt helper is running. When the requested
//! codec is unavailable the fetch walks down a fixed ladder towards `aac-legacy`,
//! which every track has and which needs no helper.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use super::catalog::CatalogItem;
use super::error::DownloadError;
use super::fetch::{FetchError, Fetcher};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Codec {
    Alac,
    Atmos,
    Ac3,
    AacBinaural,
    AacDownmix,
    Aac,
    AacHe,
    AacHeLegacy,
    AacLegacy,
}

/// Codecs tried after each codec, best to worst.
///
/// Acyclic; every chain ends at `AacLegacy`.
const FALLBACKS: &[(Codec, &[Codec])] = &[
    (Codec::Alac, &[Codec::Aac, Codec::AacLegacy]),
    (Codec::Atmos, &[Codec::Ac3, Codec::Aac, Codec::AacLegacy]),
    (Codec::Ac3, &[Codec::Aac, Codec::AacLegacy]),
    (Codec::AacBinaural, &[Codec::Aac, Codec::AacLegacy]),
    (Codec::AacDownmix, &[Codec::Aac, Codec::AacLegacy]),
    (Codec::Aac, &[Codec::AacLegacy]),
    (Codec::AacHe, &[Codec::AacHeLegacy, Codec::AacLegacy]),
    (Codec::AacHeLegacy, &[Codec::AacLegacy]),
    (Codec::AacLegacy, &[]),
];

impl Codec {
    pub const ALL: [Codec; 9] = [
        Codec::Alac,
        Codec::Atmos,
        Codec::Ac3,
        Codec::AacBinaural,
        Codec::AacDownmix,
        Codec::Aac,
        Codec::AacHe,
        Codec::AacHeLegacy,
        Codec::AacLegacy,
    ];

    /// Name understood by the downloader's `--codec-song` flag.
    pub fn as_str(&self) -> &'static str {
        match self {
            Codec::Alac => "alac",
            Codec::Atmos => "atmos",
            Codec::Ac3 => "ac3",
            Codec::AacBinaural => "aac-binaural",
            Codec::AacDownmix => "aac-downmix",
            Codec::Aac => "aac",
            Codec::AacHe => "aac-he",
            Codec::AacHeLegacy => "aac-he-legacy",
            Codec::AacLegacy => "aac-legacy",
        }
    }

    /// Legacy AAC streams use the widevine path; everything else goes through the helper.
    pub fn requires_decrypt_helper(&self) -> bool {
        !matches!(self, Codec::AacLegacy | Codec::AacHeLegacy)
    }

    /// Next codecs to try when this one is not available.
    pub fn fallbacks(&self) -> &'static [Codec] {
        FALLBACKS
            .iter()
            .find(|(codec, _)| codec == self)
            .map(|(_, next)| *next)
            .unwrap_or(&[])
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Codec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('_', "-");
        Codec::ALL
            .iter()
            .copied()
            .find(|codec| codec.as_str() == normalized)
            .ok_or_else(|| format!("unknown codec '{}'", s))
    }
}

/// Ordered list of codecs to attempt for a requested codec.
///
/// Codecs needing the decrypt helper are dropped up front when no helper is
/// configured, so no attempt is wasted on them.
pub fn attempt_plan(requested: Codec, helper_available: bool) -> Vec<Codec> {
    std::iter::once(requested)
        .chain(requested.fallbacks().iter().copied())
        .filter(|codec| helper_available || !codec.requires_decrypt_helper())
        .collect()
}

/// Fetches an item, walking the fallback ladder on `FormatNotAvailable`.
///
/// Any other fetch error stops the ladder immediately. On success returns the
/// local artifact and the codec that produced it.
pub async fn fetch_with_fallback(
    fetcher: &dyn Fetcher,
    item: &CatalogItem,
    requested: Codec,
    helper_available: bool,
) -> Result<(PathBuf, Codec), DownloadError> {
    let plan = attempt_plan(requested, helper_available);
    if plan.is_empty() {
        return Err(DownloadError::NoUsableCodec { requested });
    }

    let mut attempted = Vec::with_capacity(plan.len());
    for codec in plan {
        attempted.push(codec);
        match fetcher.fetch(item, codec).await {
            Ok(path) => {
                if attempted.len() > 1 {
                    log::info!("Fetched {} as {} after {} attempts", item.id, codec, attempted.len());
                }
                return Ok((path, codec));
            }
            Err(FetchError::FormatNotAvailable(unavailable)) => {
                log::debug!("{} not available for {}, trying next codec", unavailable, item.id);
            }
            Err(FetchError::AuthExpired(msg)) => return Err(DownloadError::AuthExpired(msg)),
            Err(FetchError::Unknown(msg)) => return Err(DownloadError::Fetch(msg)),
        }
    }

    log::warn!(
        "No codec available for {} (tried: {})",
        item.id,
        attempted.iter().map(Codec::as_str).collect::<Vec<_>>().join(", ")
    );
    Err(DownloadError::FormatsExhausted { attempted })
}
