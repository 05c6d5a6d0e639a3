// src/media/payload.rs
//! Vertex AI request bodies, one builder per model family.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::models::generation::{GenerationRequest, MediaInput, Modality};

/// Which publisher-model RPC a payload is sent to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Rpc {
    PredictLongRunning,
    Predict,
    GenerateContent,
}

impl Rpc {
    pub fn as_str(&self) -> &'static str {
        match self {
            Rpc::PredictLongRunning => "predictLongRunning",
            Rpc::Predict => "predict",
            Rpc::GenerateContent => "generateContent",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Payload {
    pub model: String,
    pub rpc: Rpc,
    /// Gemini models are served from the `global` location only.
    pub global: bool,
    pub body: Value,
}

impl Payload {
    pub fn url(&self, project: &str, location: &str) -> String {
        model_url(project, location, &self.model, self.global, self.rpc.as_str())
    }
}

/// Public Vertex AI host for `location`.
pub fn api_host(location: &str, global: bool) -> String {
    if global {
        "https://aiplatform.googleapis.com".to_string()
    } else {
        format!("https://{}-aiplatform.googleapis.com", location)
    }
}

/// Path of a publisher-model RPC, starting at `/v1`.
pub fn model_path(project: &str, location: &str, model: &str, global: bool, method: &str) -> String {
    format!(
        "/v1/projects/{}/locations/{}/publishers/google/models/{}:{}",
        project,
        if global { "global" } else { location },
        model,
        method
    )
}

pub fn model_url(project: &str, location: &str, model: &str, global: bool, method: &str) -> String {
    format!(
        "{}{}",
        api_host(location, global),
        model_path(project, location, model, global, method)
    )
}

/// Builds the request for `request`. `output_uri` is the `gs://` folder a
/// long-running job writes into; synchronous models ignore it.
pub fn build(request: &GenerationRequest, output_uri: &str) -> Payload {
    match request.modality {
        Modality::TextToVideo | Modality::ImageToVideo => veo(request, output_uri),
        Modality::TextToImage => imagen(request),
        Modality::ImageToImage => gemini_image(request),
        Modality::TextToAudio => lyria(request),
        Modality::TextToVoice => gemini_tts(request),
    }
}

fn veo(request: &GenerationRequest, output_uri: &str) -> Payload {
    let mut instance = Map::new();
    if !request.prompt.is_empty() {
        instance.insert("prompt".into(), json!(request.prompt));
    }
    if let Some(image) = request.input_images.first() {
        instance.insert("image".into(), prediction_image(image));
    }
    if let Some(last) = &request.last_frame {
        instance.insert("lastFrame".into(), prediction_image(last));
    }

    let mut parameters = Map::new();
    parameters.insert("sampleCount".into(), json!(request.sample_count));
    parameters.insert("storageUri".into(), json!(output_uri));
    insert_opt(&mut parameters, "durationSeconds", request.duration_seconds);
    insert_opt(&mut parameters, "aspectRatio", request.aspect_ratio.as_ref());
    insert_opt(&mut parameters, "personGeneration", request.person_generation.as_ref());
    insert_opt(&mut parameters, "negativePrompt", request.negative_prompt.as_ref());
    insert_opt(&mut parameters, "seed", request.seed);
    insert_opt(&mut parameters, "enhancePrompt", request.enhance_prompt);
    insert_opt(&mut parameters, "resolution", request.resolution.as_ref());
    insert_opt(&mut parameters, "generateAudio", request.generate_audio);

    Payload {
        model: request.model.clone(),
        rpc: Rpc::PredictLongRunning,
        global: false,
        body: json!({ "instances": [instance], "parameters": parameters }),
    }
}

fn imagen(request: &GenerationRequest) -> Payload {
    let mut parameters = Map::new();
    parameters.insert("sampleCount".into(), json!(request.sample_count));
    insert_opt(&mut parameters, "aspectRatio", request.aspect_ratio.as_ref());
    insert_opt(&mut parameters, "personGeneration", request.person_generation.as_ref());
    insert_opt(&mut parameters, "safetySetting", request.safety_filter_level.as_ref());
    insert_opt(&mut parameters, "negativePrompt", request.negative_prompt.as_ref());
    insert_opt(&mut parameters, "enhancePrompt", request.enhance_prompt);
    insert_opt(&mut parameters, "sampleImageSize", request.image_size.as_ref());
    if let Some(seed) = request.seed {
        // Imagen only honors a seed with watermarking off.
        parameters.insert("seed".into(), json!(seed));
        parameters.insert("addWatermark".into(), json!(false));
    }

    Payload {
        model: request.model.clone(),
        rpc: Rpc::Predict,
        global: false,
        body: json!({
            "instances": [{ "prompt": request.prompt }],
            "parameters": parameters,
        }),
    }
}

fn gemini_image(request: &GenerationRequest) -> Payload {
    let mut parts: Vec<Value> = request.input_images.iter().map(content_part).collect();
    // The instruction goes after the images.
    parts.push(json!({ "text": request.prompt }));

    let mut generation_config = json!({ "responseModalities": ["TEXT", "IMAGE"] });
    if let Some(ratio) = &request.aspect_ratio {
        generation_config["imageConfig"] = json!({ "aspectRatio": ratio });
    }

    Payload {
        model: request.model.clone(),
        rpc: Rpc::GenerateContent,
        global: true,
        body: json!({
            "contents": [{ "role": "user", "parts": parts }],
            "generationConfig": generation_config,
        }),
    }
}

fn lyria(request: &GenerationRequest) -> Payload {
    // Lyria takes snake_case field names.
    let mut instance = Map::new();
    instance.insert("prompt".into(), json!(request.prompt));
    insert_opt(&mut instance, "negative_prompt", request.negative_prompt.as_ref());

    let mut parameters = Map::new();
    match request.seed {
        Some(seed) => {
            instance.insert("seed".into(), json!(seed));
        }
        None => {
            parameters.insert("sample_count".into(), json!(request.sample_count));
        }
    }

    Payload {
        model: request.model.clone(),
        rpc: Rpc::Predict,
        global: false,
        body: json!({ "instances": [instance], "parameters": parameters }),
    }
}

fn gemini_tts(request: &GenerationRequest) -> Payload {
    let speech_config = if request.speakers.is_empty() {
        json!({
            "voiceConfig": prebuilt_voice(request.voice.as_deref().unwrap_or_default()),
        })
    } else {
        let speakers: Vec<Value> = request
            .speakers
            .iter()
            .map(|s| json!({ "speaker": s.name, "voiceConfig": prebuilt_voice(&s.voice) }))
            .collect();
        json!({ "multiSpeakerVoiceConfig": { "speakerVoiceConfigs": speakers } })
    };

    Payload {
        model: request.model.clone(),
        rpc: Rpc::GenerateContent,
        global: true,
        body: json!({
            "contents": [{ "role": "user", "parts": [{ "text": request.prompt }] }],
            "generationConfig": {
                "responseModalities": ["AUDIO"],
                "speechConfig": speech_config,
            },
        }),
    }
}

/// Model that turns a reference image into a video prompt.
pub const PROMPT_MODEL: &str = "gemini-2.5-flash";

pub const DEFAULT_PROMPT_INSTRUCTIONS: &str = "Describe this image as a prompt for a short \
video generation model. Cover the subject, the setting, the lighting, the camera angle and \
a plausible motion for the next few seconds. Answer with the prompt only, in one paragraph.";

/// Asks Gemini for a text prompt describing `image`.
pub fn describe_image(image: &MediaInput, instructions: Option<&str>) -> Payload {
    let instructions = instructions
        .map(str::trim)
        .filter(|i| !i.is_empty())
        .unwrap_or(DEFAULT_PROMPT_INSTRUCTIONS);

    Payload {
        model: PROMPT_MODEL.to_string(),
        rpc: Rpc::GenerateContent,
        global: true,
        body: json!({
            "contents": [{
                "role": "user",
                "parts": [content_part(image), { "text": instructions }],
            }],
            "generationConfig": {
                "temperature": 0.2,
                "topP": 0.8,
                "maxOutputTokens": 2048,
                "responseModalities": ["TEXT"],
            },
        }),
    }
}

fn prebuilt_voice(name: &str) -> Value {
    json!({ "prebuiltVoiceConfig": { "voiceName": name } })
}

/// Image reference in the `instances` style used by Veo.
fn prediction_image(image: &MediaInput) -> Value {
    match (&image.gcs_uri, &image.bytes_base64_encoded) {
        (Some(uri), _) => json!({ "gcsUri": uri, "mimeType": image.mime_type }),
        (None, data) => json!({
            "bytesBase64Encoded": data.as_deref().unwrap_or_default(),
            "mimeType": image.mime_type,
        }),
    }
}

/// Image reference in the `contents[].parts` style used by Gemini.
fn content_part(image: &MediaInput) -> Value {
    match (&image.gcs_uri, &image.bytes_base64_encoded) {
        (Some(uri), _) => json!({ "fileData": { "mimeType": image.mime_type, "fileUri": uri } }),
        (None, data) => json!({
            "inlineData": { "mimeType": image.mime_type, "data": data.as_deref().unwrap_or_default() }
        }),
    }
}

fn insert_opt<T: Serialize>(map: &mut Map<String, Value>, key: &str, value: Option<T>) {
    if let Some(v) = value {
        map.insert(key.to_string(), json!(v));
    }
}
