//! Byte-to-byte chunk codecs.
//!
//! A [`CodecChain`] lists codecs in encode order (e.g. shuffle then zlib);
//! decoding applies them in reverse.
//! Each codec is also a zarrs bytes-to-bytes plugin ([`ShuffleCodec`],
//! [`ZlibCodec`], [`GzipCodec`]), so arrays opened through
//! [`zarrs::array::Array`] decode their chunks with the same code.

use std::borrow::Cow;
use std::io::{Read, Write};
use std::sync::{Arc, Once};

use flate2::Compression;
use flate2::read::{GzDecoder, ZlibDecoder};
use flate2::write::{GzEncoder, ZlibEncoder};
use serde::{Deserialize, Serialize};
use zarrs::array::{ArrayBytesRaw, BytesRepresentation};
use zarrs::metadata::Configuration;
use zarrs::metadata::v2::MetadataV2;
use zarrs::metadata::v3::MetadataV3;
use zarrs::plugin::{
    ExtensionAliases, PluginCreateError, ZarrVersion, ZarrVersion2, ZarrVersion3,
};
use zarrs_codec::{
    BytesToBytesCodecTraits, CodecError, CodecMetadataOptions, CodecOptions, CodecPluginV2,
    CodecPluginV3, CodecRuntimePluginV2, CodecRuntimePluginV3, CodecTraits, CodecTraitsV2,
    CodecTraitsV3, PartialDecoderCapability, PartialEncoderCapability, RecommendedConcurrency,
};

/// A supported bytes-to-bytes codec.
///
/// Serializes in the numcodecs style, e.g. `{"id": "shuffle", "elementsize": 4}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "id", rename_all = "lowercase")]
pub enum Codec {
    /// Byte transposition grouping byte `j` of every element together.
    Shuffle { elementsize: usize },
    /// zlib-wrapped deflate.
    Zlib { level: u32 },
    /// gzip-wrapped deflate.
    Gzip { level: u32 },
}

impl Codec {
    pub fn encode(&self, bytes: &[u8]) -> crate::Result<Vec<u8>> {
        match self {
            Codec::Shuffle { elementsize } => Ok(shuffle(bytes, *elementsize)),
            Codec::Zlib { level } => {
                let mut encoder = ZlibEncoder::new(Vec::new(), Compression::new(*level));
                encoder.write_all(bytes).map_err(crate::Error::wrap)?;
                encoder.finish().map_err(crate::Error::wrap)
            }
            Codec::Gzip { level } => {
                let mut encoder = GzEncoder::new(Vec::new(), Compression::new(*level));
                encoder.write_all(bytes).map_err(crate::Error::wrap)?;
                encoder.finish().map_err(crate::Error::wrap)
            }
        }
    }

    pub fn decode(&self, bytes: &[u8]) -> crate::Result<Vec<u8>> {
        match self {
            Codec::Shuffle { elementsize } => Ok(unshuffle(bytes, *elementsize)),
            Codec::Zlib { .. } => {
                let mut out = Vec::new();
                ZlibDecoder::new(bytes)
                    .read_to_end(&mut out)
                    .map_err(|e| crate::Error::decode(format!("zlib: {e}")))?;
                Ok(out)
            }
            Codec::Gzip { .. } => {
                let mut out = Vec::new();
                GzDecoder::new(bytes)
                    .read_to_end(&mut out)
                    .map_err(|e| crate::Error::decode(format!("gzip: {e}")))?;
                Ok(out)
            }
        }
    }

    /// The metadata configuration of this codec, without its `id`.
    pub fn configuration(&self) -> Option<Configuration> {
        match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(mut map)) => {
                map.remove("id");
                Some(Configuration::from(map))
            }
            _ => None,
        }
    }

    fn encoded_representation(&self, decoded: &BytesRepresentation) -> BytesRepresentation {
        match self {
            Codec::Shuffle { .. } => *decoded,
            // worst case for stored deflate blocks plus the zlib/gzip framing
            Codec::Zlib { .. } | Codec::Gzip { .. } => decoded
                .size()
                .map_or(BytesRepresentation::UnboundedSize, |size| {
                    BytesRepresentation::BoundedSize(size + (size >> 12) + (size >> 14) + (size >> 25) + 31)
                }),
        }
    }
}

/// Group byte `j` of every `elementsize`-byte element together.
///
/// Trailing bytes which do not form a whole element are appended unchanged.
pub fn shuffle(bytes: &[u8], elementsize: usize) -> Vec<u8> {
    let mut out = bytes.to_vec();
    if elementsize <= 1 {
        return out;
    }
    let count = bytes.len() / elementsize;
    for i in 0..count {
        for j in 0..elementsize {
            out[j * count + i] = bytes[i * elementsize + j];
        }
    }
    out
}

/// Inverse of [shuffle]: `decoded[i * e + j] = encoded[j * n + i]`.
pub fn unshuffle(bytes: &[u8], elementsize: usize) -> Vec<u8> {
    let mut out = bytes.to_vec();
    if elementsize <= 1 {
        return out;
    }
    let count = bytes.len() / elementsize;
    for i in 0..count {
        for j in 0..elementsize {
            out[i * elementsize + j] = bytes[j * count + i];
        }
    }
    out
}

/// Ordered bytes-to-bytes codecs, stored in encode order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CodecChain {
    codecs: Vec<Codec>,
}

impl CodecChain {
    pub fn new(codecs: Vec<Codec>) -> Self {
        Self { codecs }
    }

    pub fn codecs(&self) -> &[Codec] {
        &self.codecs
    }

    pub fn is_empty(&self) -> bool {
        self.codecs.is_empty()
    }

    pub fn encode(&self, bytes: &[u8]) -> crate::Result<Vec<u8>> {
        let mut buf = Cow::Borrowed(bytes);
        for codec in &self.codecs {
            buf = Cow::Owned(codec.encode(&buf)?);
        }
        Ok(buf.into_owned())
    }

    pub fn decode(&self, bytes: &[u8]) -> crate::Result<Vec<u8>> {
        let mut buf = Cow::Borrowed(bytes);
        for codec in self.codecs.iter().rev() {
            buf = Cow::Owned(codec.decode(&buf)?);
        }
        Ok(buf.into_owned())
    }
}

impl FromIterator<Codec> for CodecChain {
    fn from_iter<T: IntoIterator<Item = Codec>>(iter: T) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

/// Configuration of the shuffle codec, e.g. `{"elementsize": 4}`.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShuffleCodecConfiguration {
    #[serde(default = "default_elementsize")]
    pub elementsize: usize,
}

// numcodecs defaults
fn default_elementsize() -> usize {
    4
}

fn default_level() -> i32 {
    1
}

/// Configuration of the zlib and gzip codecs, e.g. `{"level": 1}`.
///
/// A level of `-1` selects the library default.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeflateCodecConfiguration {
    #[serde(default = "default_level")]
    pub level: i32,
}

impl DeflateCodecConfiguration {
    fn level(&self) -> Result<u32, PluginCreateError> {
        match self.level {
            -1 => Ok(6),
            n @ 0..=9 => Ok(n as u32),
            n => Err(PluginCreateError::Other(format!(
                "invalid deflate level {n}"
            ))),
        }
    }
}

zarrs::plugin::impl_extension_aliases!(ShuffleCodec,
    v3: "numcodecs.shuffle", ["shuffle"],
    v2: "shuffle", []
);

/// The [Codec::Shuffle] codec as a zarrs plugin.
///
/// Unlike the zarrs built-in of the same name, chunks whose length is not
/// a whole number of elements are accepted; the trailing bytes pass through.
#[derive(Debug, Clone)]
pub struct ShuffleCodec {
    codec: Codec,
}

impl ShuffleCodec {
    pub fn new(elementsize: usize) -> Self {
        Self {
            codec: Codec::Shuffle { elementsize },
        }
    }

    pub fn new_with_configuration(
        configuration: &ShuffleCodecConfiguration,
    ) -> Result<Self, PluginCreateError> {
        if configuration.elementsize == 0 {
            return Err(PluginCreateError::Other(
                "shuffle elementsize must be positive".to_string(),
            ));
        }
        Ok(Self::new(configuration.elementsize))
    }
}

zarrs::plugin::impl_extension_aliases!(ZlibCodec,
    v3: "numcodecs.zlib", ["zlib"],
    v2: "zlib", []
);

/// The [Codec::Zlib] codec as a zarrs plugin.
#[derive(Debug, Clone)]
pub struct ZlibCodec {
    codec: Codec,
}

impl ZlibCodec {
    pub fn new(level: u32) -> Self {
        Self {
            codec: Codec::Zlib { level },
        }
    }

    pub fn new_with_configuration(
        configuration: &DeflateCodecConfiguration,
    ) -> Result<Self, PluginCreateError> {
        Ok(Self::new(configuration.level()?))
    }
}

zarrs::plugin::impl_extension_aliases!(GzipCodec,
    v3: "gzip", ["numcodecs.gzip"],
    v2: "gzip", []
);

/// The [Codec::Gzip] codec as a zarrs plugin.
#[derive(Debug, Clone)]
pub struct GzipCodec {
    codec: Codec,
}

impl GzipCodec {
    pub fn new(level: u32) -> Self {
        Self {
            codec: Codec::Gzip { level },
        }
    }

    pub fn new_with_configuration(
        configuration: &DeflateCodecConfiguration,
    ) -> Result<Self, PluginCreateError> {
        Ok(Self::new(configuration.level()?))
    }
}

/// Implements the zarrs codec traits for a plugin wrapping a [Codec] in its
/// `codec` field, and submits the plugin for both Zarr versions.
macro_rules! impl_bytes_to_bytes_plugin {
    ($type:ident) => {
        inventory::submit! {
            CodecPluginV3::new::<$type>()
        }
        inventory::submit! {
            CodecPluginV2::new::<$type>()
        }

        impl CodecTraitsV3 for $type {
            fn create(metadata: &MetadataV3) -> Result<zarrs_codec::Codec, PluginCreateError> {
                let configuration = metadata.to_typed_configuration()?;
                let codec = Arc::new($type::new_with_configuration(&configuration)?);
                Ok(zarrs_codec::Codec::BytesToBytes(codec))
            }
        }

        impl CodecTraitsV2 for $type {
            fn create(metadata: &MetadataV2) -> Result<zarrs_codec::Codec, PluginCreateError> {
                let configuration = metadata.to_typed_configuration()?;
                let codec = Arc::new($type::new_with_configuration(&configuration)?);
                Ok(zarrs_codec::Codec::BytesToBytes(codec))
            }
        }

        impl CodecTraits for $type {
            fn as_any(&self) -> &dyn std::any::Any {
                self
            }

            fn configuration(
                &self,
                _version: ZarrVersion,
                _options: &CodecMetadataOptions,
            ) -> Option<Configuration> {
                self.codec.configuration()
            }

            fn partial_decoder_capability(&self) -> PartialDecoderCapability {
                PartialDecoderCapability {
                    partial_read: false,
                    partial_decode: false,
                }
            }

            fn partial_encoder_capability(&self) -> PartialEncoderCapability {
                PartialEncoderCapability {
                    partial_encode: false,
                }
            }
        }

        #[cfg_attr(
            all(feature = "async", not(target_arch = "wasm32")),
            async_trait::async_trait
        )]
        #[cfg_attr(all(feature = "async", target_arch = "wasm32"), async_trait::async_trait(?Send))]
        impl BytesToBytesCodecTraits for $type {
            fn into_dyn(self: Arc<Self>) -> Arc<dyn BytesToBytesCodecTraits> {
                self as Arc<dyn BytesToBytesCodecTraits>
            }

            fn recommended_concurrency(
                &self,
                _decoded_representation: &BytesRepresentation,
            ) -> Result<RecommendedConcurrency, CodecError> {
                Ok(RecommendedConcurrency::new_maximum(1))
            }

            fn encoded_representation(
                &self,
                decoded_representation: &BytesRepresentation,
            ) -> BytesRepresentation {
                self.codec.encoded_representation(decoded_representation)
            }

            fn encode<'a>(
                &self,
                decoded_value: ArrayBytesRaw<'a>,
                _options: &CodecOptions,
            ) -> Result<ArrayBytesRaw<'a>, CodecError> {
                self.codec
                    .encode(&decoded_value)
                    .map(Cow::Owned)
                    .map_err(|e| CodecError::Other(e.to_string()))
            }

            fn decode<'a>(
                &self,
                encoded_value: ArrayBytesRaw<'a>,
                _decoded_representation: &BytesRepresentation,
                _options: &CodecOptions,
            ) -> Result<ArrayBytesRaw<'a>, CodecError> {
                self.codec
                    .decode(&encoded_value)
                    .map(Cow::Owned)
                    .map_err(|e| CodecError::Other(e.to_string()))
            }
        }
    };
}

impl_bytes_to_bytes_plugin!(ShuffleCodec);
impl_bytes_to_bytes_plugin!(ZlibCodec);
impl_bytes_to_bytes_plugin!(GzipCodec);

fn register_runtime<T>()
where
    T: ExtensionAliases<ZarrVersion3>
        + ExtensionAliases<ZarrVersion2>
        + CodecTraitsV3
        + CodecTraitsV2
        + 'static,
{
    zarrs_codec::register_codec_v3(CodecRuntimePluginV3::new(
        <T as ExtensionAliases<ZarrVersion3>>::matches_name,
        <T as CodecTraitsV3>::create,
    ));
    zarrs_codec::register_codec_v2(CodecRuntimePluginV2::new(
        <T as ExtensionAliases<ZarrVersion2>>::matches_name,
        <T as CodecTraitsV2>::create,
    ));
}

/// Give this crate's codecs precedence over zarrs built-ins claiming the
/// same names. Idempotent; the stores call it on construction.
pub fn register_codecs() {
    static REGISTER: Once = Once::new();
    REGISTER.call_once(|| {
        register_runtime::<ShuffleCodec>();
        register_runtime::<ZlibCodec>();
        register_runtime::<GzipCodec>();
        log::debug!("registered shuffle, zlib and gzip codecs");
    });
}
