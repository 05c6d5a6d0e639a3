// src/models/generation.rs
//! Generation parameters: the lenient UI submission and its validated form.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ValidationError;

/// The kind of generation requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Modality {
    TextToVideo,
    ImageToVideo,
    TextToImage,
    ImageToImage,
    TextToAudio,
    TextToVoice,
}

impl Modality {
    pub const ALL: [Modality; 6] = [
        Modality::TextToVideo,
        Modality::ImageToVideo,
        Modality::TextToImage,
        Modality::ImageToImage,
        Modality::TextToAudio,
        Modality::TextToVoice,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Modality::TextToVideo => "text-to-video",
            Modality::ImageToVideo => "image-to-video",
            Modality::TextToImage => "text-to-image",
            Modality::ImageToImage => "image-to-image",
            Modality::TextToAudio => "text-to-audio",
            Modality::TextToVoice => "text-to-voice",
        }
    }

    /// Video generation runs as a long-running operation that must be polled.
    pub fn is_long_running(&self) -> bool {
        matches!(self, Modality::TextToVideo | Modality::ImageToVideo)
    }

    pub fn is_video(&self) -> bool {
        self.is_long_running()
    }

    /// MIME type of the artifacts this modality produces.
    pub fn output_mime_type(&self) -> &'static str {
        match self {
            Modality::TextToVideo | Modality::ImageToVideo => "video/mp4",
            Modality::TextToImage | Modality::ImageToImage => "image/png",
            Modality::TextToAudio | Modality::TextToVoice => "audio/wav",
        }
    }

    pub fn default_model(&self) -> &'static str {
        self.supported_models()[0]
    }

    pub fn supported_models(&self) -> &'static [&'static str] {
        match self {
            Modality::TextToVideo | Modality::ImageToVideo => &[
                "veo-3.1-generate-preview",
                "veo-3.1-fast-generate-preview",
                "veo-3.0-generate-001",
                "veo-3.0-fast-generate-001",
                "veo-2.0-generate-001",
            ],
            Modality::TextToImage => &[
                "imagen-4.0-generate-001",
                "imagen-4.0-ultra-generate-001",
                "imagen-4.0-fast-generate-001",
                "imagen-3.0-generate-002",
                "imagen-3.0-fast-generate-001",
            ],
            Modality::ImageToImage => &["gemini-2.5-flash-image", "gemini-2.5-flash-image-preview"],
            Modality::TextToAudio => &["lyria-002"],
            Modality::TextToVoice => &["gemini-2.5-flash-preview-tts", "gemini-2.5-pro-preview-tts"],
        }
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Modality {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('_', "-");
        Modality::ALL
            .into_iter()
            .find(|m| m.as_str() == normalized)
            .ok_or_else(|| ValidationError::UnknownModality(s.to_string()))
    }
}

/// An input image, either already in storage or inline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaInput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gcs_uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bytes_base64_encoded: Option<String>,
    pub mime_type: String,
}

/// One voice in a multi-speaker script. The speaker name must match the
/// `Name:` prefixes used in the prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Speaker {
    pub name: String,
    pub voice: String,
}

/// Parameters exactly as submitted by the UI. Every field is optional; nothing
/// here has been checked yet.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawParams {
    pub modality: Option<String>,
    pub model: Option<String>,
    pub prompt: Option<String>,
    pub negative_prompt: Option<String>,
    pub sample_count: Option<u32>,
    pub duration_seconds: Option<u32>,
    pub seed: Option<u32>,
    pub aspect_ratio: Option<String>,
    pub person_generation: Option<String>,
    pub resolution: Option<String>,
    pub generate_audio: Option<bool>,
    pub enhance_prompt: Option<bool>,
    pub image_size: Option<String>,
    pub safety_filter_level: Option<String>,
    pub voice: Option<String>,
    #[serde(default)]
    pub speakers: Vec<Speaker>,
    #[serde(default)]
    pub input_images: Vec<MediaInput>,
    /// Final frame for image-to-video interpolation.
    pub last_frame: Option<MediaInput>,
}

const VIDEO_ASPECT_RATIOS: &[&str] = &["16:9", "9:16"];
const IMAGE_ASPECT_RATIOS: &[&str] = &["1:1", "9:16", "16:9", "3:4", "4:3"];
const EDIT_ASPECT_RATIOS: &[&str] = &[
    "1:1", "2:3", "3:2", "3:4", "4:3", "4:5", "5:4", "9:16", "16:9", "21:9",
];
const VIDEO_PERSON_GENERATION: &[&str] = &["allow_adult", "dont_allow"];
const IMAGE_PERSON_GENERATION: &[&str] = &["allow_adult", "allow_all", "dont_allow"];
const VIDEO_RESOLUTIONS: &[&str] = &["720p", "1080p"];
const IMAGE_SIZES: &[&str] = &["1K", "2K"];
const SAFETY_FILTER_LEVELS: &[&str] = &["block_most", "block_some", "block_few", "block_none"];
const MIN_VIDEO_SECONDS: u32 = 4;
const MAX_VIDEO_SECONDS: u32 = 8;
const MAX_SAMPLES: u32 = 4;
const MAX_EDIT_IMAGES: usize = 3;
/// Veo models that accept a `lastFrame`.
const INTERPOLATION_MODELS: &[&str] = &[
    "veo-3.1-generate-preview",
    "veo-3.1-fast-generate-preview",
    "veo-2.0-generate-001",
];

/// Prebuilt Gemini TTS voices.
pub const TTS_VOICES: &[&str] = &[
    "Zephyr", "Puck", "Charon", "Kore", "Fenrir", "Leda", "Orus", "Aoede",
    "Callirrhoe", "Autonoe", "Enceladus", "Iapetus", "Umbriel", "Algieba",
    "Despina", "Erinome", "Algenib", "Rasalgethi", "Laomedeia", "Achernar",
    "Alnilam", "Schedar", "Gacrux", "Pulcherrima", "Achird", "Zubenelgenubi",
    "Vindemiatrix", "Sadachbia", "Sadaltager", "Sulafat",
];

/// A submission that passed the per-modality schema check. The only way to
/// obtain one is [`GenerationRequest::from_raw`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRequest {
    pub modality: Modality,
    pub model: String,
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub negative_prompt: Option<String>,
    pub sample_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aspect_ratio: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub person_generation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generate_audio: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enhance_prompt: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_size: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub safety_filter_level: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub speakers: Vec<Speaker>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub input_images: Vec<MediaInput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_frame: Option<MediaInput>,
}

impl GenerationRequest {
    /// Validates and normalizes a raw submission.
    pub fn from_raw(raw: RawParams) -> Result<Self, ValidationError> {
        let modality_str = raw.modality.as_deref().ok_or(ValidationError::Invalid {
            param: "modality",
            reason: "a modality is required".to_string(),
        })?;
        let modality: Modality = modality_str.parse()?;

        let model = match non_empty(raw.model) {
            Some(model) => {
                if !modality.supported_models().contains(&model.as_str()) {
                    return Err(ValidationError::invalid(
                        "model",
                        format!("'{}' is not available for {}", model, modality),
                    ));
                }
                model
            }
            None => modality.default_model().to_string(),
        };

        let request = GenerationRequest {
            modality,
            model,
            prompt: raw.prompt.map(|p| p.trim().to_string()).unwrap_or_default(),
            negative_prompt: non_empty(raw.negative_prompt),
            sample_count: raw.sample_count.unwrap_or(1),
            duration_seconds: raw.duration_seconds,
            // The UI sends 0 for "no seed".
            seed: raw.seed.filter(|s| *s != 0),
            aspect_ratio: non_empty(raw.aspect_ratio),
            person_generation: non_empty(raw.person_generation),
            resolution: non_empty(raw.resolution),
            generate_audio: raw.generate_audio,
            enhance_prompt: raw.enhance_prompt,
            image_size: non_empty(raw.image_size),
            safety_filter_level: non_empty(raw.safety_filter_level).map(|s| s.to_ascii_lowercase()),
            voice: non_empty(raw.voice),
            speakers: raw.speakers,
            input_images: raw.input_images,
            last_frame: raw.last_frame,
        };

        request.validate()?;
        Ok(request.with_defaults())
    }

    /// Re-checks the per-modality schema. Also used by the history store to
    /// refuse malformed records.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let modality = self.modality;

        if !modality.supported_models().contains(&self.model.as_str()) {
            return Err(ValidationError::invalid(
                "model",
                format!("'{}' is not available for {}", self.model, modality),
            ));
        }
        if self.prompt.is_empty() && modality != Modality::ImageToVideo {
            return Err(ValidationError::Missing { param: "prompt", modality });
        }
        if self.sample_count == 0 || self.sample_count > MAX_SAMPLES {
            return Err(ValidationError::invalid(
                "sampleCount",
                format!("must be between 1 and {}", MAX_SAMPLES),
            ));
        }
        for image in &self.input_images {
            image.validate("inputImages")?;
        }
        if let Some(frame) = &self.last_frame {
            frame.validate("lastFrame")?;
        }

        match modality {
            Modality::TextToVideo | Modality::ImageToVideo => self.validate_video(),
            Modality::TextToImage => self.validate_image(),
            Modality::ImageToImage => self.validate_edit(),
            Modality::TextToAudio => self.validate_audio(),
            Modality::TextToVoice => self.validate_voice(),
        }
    }

    fn validate_video(&self) -> Result<(), ValidationError> {
        let modality = self.modality;
        let duration = self
            .duration_seconds
            .ok_or(ValidationError::Missing { param: "durationSeconds", modality })?;
        if !(MIN_VIDEO_SECONDS..=MAX_VIDEO_SECONDS).contains(&duration) {
            return Err(ValidationError::invalid(
                "durationSeconds",
                format!("must be between {} and {} seconds", MIN_VIDEO_SECONDS, MAX_VIDEO_SECONDS),
            ));
        }
        check_choice("aspectRatio", self.aspect_ratio.as_deref(), VIDEO_ASPECT_RATIOS)?;
        check_choice("personGeneration", self.person_generation.as_deref(), VIDEO_PERSON_GENERATION)?;
        check_choice("resolution", self.resolution.as_deref(), VIDEO_RESOLUTIONS)?;

        let is_veo2 = self.model.starts_with("veo-2");
        if is_veo2 && self.resolution.is_some() {
            return Err(ValidationError::invalid("resolution", "Veo 2 only renders 720p"));
        }
        if is_veo2 && self.generate_audio == Some(true) {
            return Err(ValidationError::invalid("generateAudio", "Veo 2 cannot generate audio"));
        }

        match modality {
            Modality::ImageToVideo if self.input_images.len() != 1 => {
                if self.input_images.is_empty() {
                    return Err(ValidationError::Missing { param: "inputImages", modality });
                }
                return Err(ValidationError::invalid(
                    "inputImages",
                    "image-to-video takes exactly one image",
                ));
            }
            Modality::TextToVideo => {
                reject_images(&self.input_images, modality)?;
                reject(self.last_frame.is_some(), "lastFrame", modality)?;
            }
            _ => {}
        }
        if self.last_frame.is_some() && !INTERPOLATION_MODELS.contains(&self.model.as_str()) {
            return Err(ValidationError::invalid(
                "lastFrame",
                format!("'{}' cannot interpolate between two frames", self.model),
            ));
        }

        reject(self.image_size.is_some(), "imageSize", modality)?;
        reject(self.safety_filter_level.is_some(), "safetyFilterLevel", modality)?;
        self.reject_voice()
    }

    fn validate_image(&self) -> Result<(), ValidationError> {
        let modality = self.modality;
        check_choice("aspectRatio", self.aspect_ratio.as_deref(), IMAGE_ASPECT_RATIOS)?;
        check_choice("personGeneration", self.person_generation.as_deref(), IMAGE_PERSON_GENERATION)?;
        check_choice("safetyFilterLevel", self.safety_filter_level.as_deref(), SAFETY_FILTER_LEVELS)?;
        check_choice("imageSize", self.image_size.as_deref(), IMAGE_SIZES)?;
        if self.image_size.is_some()
            && !matches!(
                self.model.as_str(),
                "imagen-4.0-generate-001" | "imagen-4.0-ultra-generate-001"
            )
        {
            return Err(ValidationError::invalid(
                "imageSize",
                format!("'{}' does not support a custom image size", self.model),
            ));
        }
        reject_images(&self.input_images, modality)?;
        self.reject_video_only()?;
        self.reject_voice()
    }

    fn validate_edit(&self) -> Result<(), ValidationError> {
        let modality = self.modality;
        if self.input_images.is_empty() {
            return Err(ValidationError::Missing { param: "inputImages", modality });
        }
        if self.input_images.len() > MAX_EDIT_IMAGES {
            return Err(ValidationError::invalid(
                "inputImages",
                format!("at most {} images can be edited together", MAX_EDIT_IMAGES),
            ));
        }
        if self.sample_count != 1 {
            return Err(ValidationError::invalid("sampleCount", "image editing returns one image"));
        }
        check_choice("aspectRatio", self.aspect_ratio.as_deref(), EDIT_ASPECT_RATIOS)?;
        reject(self.negative_prompt.is_some(), "negativePrompt", modality)?;
        reject(self.seed.is_some(), "seed", modality)?;
        reject(self.person_generation.is_some(), "personGeneration", modality)?;
        reject(self.image_size.is_some(), "imageSize", modality)?;
        reject(self.safety_filter_level.is_some(), "safetyFilterLevel", modality)?;
        reject(self.enhance_prompt.is_some(), "enhancePrompt", modality)?;
        self.reject_video_only()?;
        self.reject_voice()
    }

    fn validate_audio(&self) -> Result<(), ValidationError> {
        let modality = self.modality;
        if self.seed.is_some() && self.sample_count > 1 {
            return Err(ValidationError::invalid(
                "sampleCount",
                "a seed can only be combined with a single sample",
            ));
        }
        reject(self.aspect_ratio.is_some(), "aspectRatio", modality)?;
        reject(self.person_generation.is_some(), "personGeneration", modality)?;
        reject(self.image_size.is_some(), "imageSize", modality)?;
        reject(self.safety_filter_level.is_some(), "safetyFilterLevel", modality)?;
        reject(self.enhance_prompt.is_some(), "enhancePrompt", modality)?;
        reject_images(&self.input_images, modality)?;
        self.reject_video_only()?;
        self.reject_voice()
    }

    fn validate_voice(&self) -> Result<(), ValidationError> {
        let modality = self.modality;
        match (&self.voice, self.speakers.len()) {
            (None, 0) => return Err(ValidationError::Missing { param: "voice", modality }),
            (Some(_), n) if n > 0 => {
                return Err(ValidationError::invalid(
                    "speakers",
                    "use either a single voice or a speaker list, not both",
                ))
            }
            (None, n) if n != 2 => {
                return Err(ValidationError::invalid(
                    "speakers",
                    "multi-speaker scripts take exactly two speakers",
                ))
            }
            _ => {}
        }
        let voices = self
            .voice
            .iter()
            .map(String::as_str)
            .chain(self.speakers.iter().map(|s| s.voice.as_str()));
        for voice in voices {
            if !TTS_VOICES.contains(&voice) {
                return Err(ValidationError::invalid("voice", format!("unknown voice '{}'", voice)));
            }
        }
        if self.speakers.iter().any(|s| s.name.trim().is_empty()) {
            return Err(ValidationError::invalid("speakers", "every speaker needs a name"));
        }
        if self.sample_count != 1 {
            return Err(ValidationError::invalid("sampleCount", "speech returns one clip"));
        }
        reject(self.negative_prompt.is_some(), "negativePrompt", modality)?;
        reject(self.seed.is_some(), "seed", modality)?;
        reject(self.aspect_ratio.is_some(), "aspectRatio", modality)?;
        reject(self.person_generation.is_some(), "personGeneration", modality)?;
        reject(self.image_size.is_some(), "imageSize", modality)?;
        reject(self.safety_filter_level.is_some(), "safetyFilterLevel", modality)?;
        reject(self.enhance_prompt.is_some(), "enhancePrompt", modality)?;
        reject_images(&self.input_images, modality)?;
        self.reject_video_only()
    }

    fn reject_video_only(&self) -> Result<(), ValidationError> {
        let modality = self.modality;
        reject(self.duration_seconds.is_some(), "durationSeconds", modality)?;
        reject(self.resolution.is_some(), "resolution", modality)?;
        reject(self.generate_audio.is_some(), "generateAudio", modality)?;
        reject(self.last_frame.is_some(), "lastFrame", modality)
    }

    fn reject_voice(&self) -> Result<(), ValidationError> {
        reject(
            self.voice.is_some() || !self.speakers.is_empty(),
            "voice",
            self.modality,
        )
    }

    /// Fills the defaults the UI preselects so the stored parameter set is complete.
    fn with_defaults(mut self) -> Self {
        match self.modality {
            Modality::TextToVideo | Modality::ImageToVideo => {
                self.aspect_ratio.get_or_insert_with(|| "16:9".to_string());
                self.person_generation.get_or_insert_with(|| "allow_adult".to_string());
                self.enhance_prompt.get_or_insert(true);
            }
            Modality::TextToImage => {
                self.aspect_ratio.get_or_insert_with(|| "1:1".to_string());
                self.person_generation.get_or_insert_with(|| "allow_adult".to_string());
                self.safety_filter_level.get_or_insert_with(|| "block_few".to_string());
                self.enhance_prompt.get_or_insert(true);
            }
            Modality::ImageToImage | Modality::TextToAudio | Modality::TextToVoice => {}
        }
        self
    }
}

impl From<&GenerationRequest> for RawParams {
    fn from(request: &GenerationRequest) -> Self {
        RawParams {
            modality: Some(request.modality.as_str().to_string()),
            model: Some(request.model.clone()),
            prompt: Some(request.prompt.clone()),
            negative_prompt: request.negative_prompt.clone(),
            sample_count: Some(request.sample_count),
            duration_seconds: request.duration_seconds,
            seed: request.seed,
            aspect_ratio: request.aspect_ratio.clone(),
            person_generation: request.person_generation.clone(),
            resolution: request.resolution.clone(),
            generate_audio: request.generate_audio,
            enhance_prompt: request.enhance_prompt,
            image_size: request.image_size.clone(),
            safety_filter_level: request.safety_filter_level.clone(),
            voice: request.voice.clone(),
            speakers: request.speakers.clone(),
            input_images: request.input_images.clone(),
            last_frame: request.last_frame.clone(),
        }
    }
}

impl MediaInput {
    /// Carries its bytes instead of pointing at storage.
    pub fn is_inline(&self) -> bool {
        self.gcs_uri.is_none() && self.bytes_base64_encoded.is_some()
    }

    /// Exactly one source, and an image type the models accept. `param`
    /// names the field in the error.
    pub fn validate(&self, param: &'static str) -> Result<(), ValidationError> {
        let has_uri = self.gcs_uri.as_deref().is_some_and(|u| u.starts_with("gs://"));
        let has_bytes = self.bytes_base64_encoded.as_deref().is_some_and(|b| !b.is_empty());
        if has_uri == has_bytes {
            return Err(ValidationError::invalid(
                param,
                "each image needs exactly one of a gs:// URI or inline base64 data",
            ));
        }
        if !matches!(self.mime_type.as_str(), "image/jpeg" | "image/png" | "image/webp") {
            return Err(ValidationError::invalid(
                param,
                format!("unsupported image type '{}'", self.mime_type),
            ));
        }
        Ok(())
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn check_choice(
    param: &'static str,
    value: Option<&str>,
    allowed: &[&str],
) -> Result<(), ValidationError> {
    match value {
        Some(v) if !allowed.contains(&v) => Err(ValidationError::invalid(
            param,
            format!("'{}' is not one of {}", v, allowed.join(", ")),
        )),
        _ => Ok(()),
    }
}

fn reject(present: bool, param: &'static str, modality: Modality) -> Result<(), ValidationError> {
    if present {
        Err(ValidationError::NotApplicable { param, modality })
    } else {
        Ok(())
    }
}

fn reject_images(images: &[MediaInput], modality: Modality) -> Result<(), ValidationError> {
    reject(!images.is_empty(), "inputImages", modality)
}
