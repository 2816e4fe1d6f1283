//! # physblit Control Server
//!
//! Line-delimited JSON-RPC 2.0 server on stdio that drives one video
//! transform stage backed by the in-process contiguous allocator and the
//! dry-run blitter.
//!
//! ## Usage
//! ```bash
//! physblit-ctl --config ~/.config/physblit/settings.json
//!
//! # With debug logging
//! RUST_LOG=physblit_core=debug physblit-ctl
//! ```

use anyhow::Result;
use physblit_core::buffer::{Memory, VideoBuffer, VideoCropMeta, VideoFrameFlags, VideoMeta};
use physblit_core::buffer_pool::AllocationQuery;
use physblit_core::blitter::BlitLog;
use physblit_core::phys_mem::{AllocationParams, ContiguousBackend};
use physblit_core::settings::{Property, PropertyValue, TransformSettings};
use physblit_core::{Caps, PadDirection, VideoTransform};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info};

// ============================================================================
// JSON-RPC Types
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
struct JsonRpcRequest {
    jsonrpc: String,
    id: Option<Value>,
    method: String,
    #[serde(default)]
    params: Value,
}

#[derive(Debug, Serialize)]
struct JsonRpcResponse {
    jsonrpc: String,
    id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<JsonRpcError>,
}

#[derive(Debug, Serialize)]
struct JsonRpcError {
    code: i32,
    message: String,
}

#[derive(Debug, Serialize)]
struct Tool {
    name: String,
    description: String,
    #[serde(rename = "inputSchema")]
    input_schema: Value,
}

// ============================================================================
// Tool Arguments
// ============================================================================

#[derive(Debug, Deserialize)]
struct TransformCapsArgs {
    direction: PadDirection,
    caps: Caps,
    #[serde(default)]
    filter: Option<Caps>,
}

#[derive(Debug, Deserialize)]
struct FixateCapsArgs {
    direction: PadDirection,
    caps: Caps,
    othercaps: Caps,
}

#[derive(Debug, Deserialize)]
struct GetPropertyArgs {
    property: Property,
}

#[derive(Debug, Deserialize)]
struct SetInfoArgs {
    in_caps: Caps,
    out_caps: Caps,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ProcessFrameArgs {
    /// Set the INTERLACED frame flag
    interlaced: bool,
    /// Leave out the video meta entirely
    no_video_meta: bool,
    crop: Option<VideoCropMeta>,
    /// Feed the frame from system memory instead of a physical block
    system_memory: bool,
    pts_us: i64,
}

fn parse_args<T: serde::de::DeserializeOwned>(args: &Value) -> Result<T, String> {
    serde_json::from_value(args.clone()).map_err(|e| format!("invalid arguments: {}", e))
}

fn to_text<T: Serialize>(value: &T) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| e.to_string())
}

// ============================================================================
// Server
// ============================================================================

struct ControlServer {
    initialized: bool,
    transform: VideoTransform,
    log: BlitLog,
    backend: Arc<ContiguousBackend>,
}

impl ControlServer {
    fn new(settings: TransformSettings) -> Result<Self> {
        let (transform, log, backend) = VideoTransform::new_dry_run(settings);
        transform.activate()?;
        Ok(Self {
            initialized: false,
            transform,
            log,
            backend,
        })
    }

    fn handle_request(&mut self, request: JsonRpcRequest) -> JsonRpcResponse {
        let id = request.id.clone().unwrap_or(Value::Null);

        let result = match request.method.as_str() {
            "initialize" => self.handle_initialize(),
            "initialized" => {
                self.initialized = true;
                Ok(json!({}))
            }
            "tools/list" => self.handle_tools_list(),
            "tools/call" => self.handle_tool_call(&request.params),
            _ => Err(JsonRpcError {
                code: -32601,
                message: format!("Method not found: {}", request.method),
            }),
        };

        match result {
            Ok(value) => JsonRpcResponse {
                jsonrpc: "2.0".into(),
                id,
                result: Some(value),
                error: None,
            },
            Err(error) => JsonRpcResponse {
                jsonrpc: "2.0".into(),
                id,
                result: None,
                error: Some(error),
            },
        }
    }

    fn handle_initialize(&self) -> Result<Value, JsonRpcError> {
        Ok(json!({
            "protocolVersion": "2024-11-05",
            "capabilities": {
                "tools": {}
            },
            "serverInfo": {
                "name": "physblit-ctl",
                "version": physblit_core::VERSION
            }
        }))
    }

    fn handle_tools_list(&self) -> Result<Value, JsonRpcError> {
        let caps_schema = json!({
            "type": "array",
            "description": "Caps as a list of structures, e.g. [{\"width\": 1920, \"height\": 1080, \"format\": \"I420\"}]"
        });
        let direction_schema = json!({
            "type": "string",
            "enum": ["sink", "src"],
            "description": "Pad the caps belong to"
        });

        let tools = vec![
            // ============================================================
            // Negotiation
            // ============================================================
            Tool {
                name: "template_caps".into(),
                description: "Caps the blitter accepts on either pad".into(),
                input_schema: json!({
                    "type": "object",
                    "properties": {},
                    "required": []
                }),
            },
            Tool {
                name: "transform_caps".into(),
                description: "Expand caps to everything the stage can convert them into".into(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "direction": direction_schema,
                        "caps": caps_schema,
                        "filter": caps_schema
                    },
                    "required": ["direction", "caps"]
                }),
            },
            Tool {
                name: "fixate_caps".into(),
                description: "Fixate the other side's caps, keeping the display aspect ratio".into(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "direction": direction_schema,
                        "caps": caps_schema,
                        "othercaps": caps_schema
                    },
                    "required": ["direction", "caps", "othercaps"]
                }),
            },
            Tool {
                name: "set_info".into(),
                description: "Lock in fixed input and output caps and decide the output pool".into(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "in_caps": caps_schema,
                        "out_caps": caps_schema
                    },
                    "required": ["in_caps", "out_caps"]
                }),
            },
            // ============================================================
            // Properties
            // ============================================================
            Tool {
                name: "set_property".into(),
                description: "Set output-rotation, enable-crop or deinterlace-mode".into(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "property": {
                            "type": "string",
                            "enum": ["output_rotation", "enable_crop", "deinterlace_mode"]
                        },
                        "value": {
                            "description": "rotation: none|rotate90|rotate180|rotate270|horizontal_flip|vertical_flip, crop: bool, deinterlace: none|slow|fast"
                        }
                    },
                    "required": ["property", "value"]
                }),
            },
            Tool {
                name: "get_property".into(),
                description: "Read a property".into(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "property": {
                            "type": "string",
                            "enum": ["output_rotation", "enable_crop", "deinterlace_mode"]
                        }
                    },
                    "required": ["property"]
                }),
            },
            // ============================================================
            // Frames / Memory
            // ============================================================
            Tool {
                name: "process_frame".into(),
                description: "Push one synthetic input frame through the stage".into(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "interlaced": { "type": "boolean" },
                        "no_video_meta": { "type": "boolean" },
                        "crop": {
                            "type": "object",
                            "properties": {
                                "x": { "type": "integer" },
                                "y": { "type": "integer" },
                                "width": { "type": "integer" },
                                "height": { "type": "integer" }
                            }
                        },
                        "system_memory": { "type": "boolean" },
                        "pts_us": { "type": "integer" }
                    },
                    "required": []
                }),
            },
            Tool {
                name: "allocator_stats".into(),
                description: "Physical memory arena usage".into(),
                input_schema: json!({
                    "type": "object",
                    "properties": {},
                    "required": []
                }),
            },
        ];

        Ok(json!({ "tools": tools }))
    }

    fn handle_tool_call(&self, params: &Value) -> Result<Value, JsonRpcError> {
        let name = params["name"].as_str().unwrap_or("");
        let args = &params["arguments"];

        debug!("Tool call: {} with args: {:?}", name, args);

        let result = match name {
            "template_caps" => to_text(&self.transform.template_caps()),
            "transform_caps" => self.tool_transform_caps(args),
            "fixate_caps" => self.tool_fixate_caps(args),
            "set_info" => self.tool_set_info(args),
            "set_property" => self.tool_set_property(args),
            "get_property" => self.tool_get_property(args),
            "process_frame" => self.tool_process_frame(args),
            "allocator_stats" => self.tool_allocator_stats(),
            _ => Err(format!("Unknown tool: {}", name)),
        };

        match result {
            Ok(text) => Ok(json!({
                "content": [{
                    "type": "text",
                    "text": text
                }]
            })),
            Err(e) => Ok(json!({
                "content": [{
                    "type": "text",
                    "text": format!("Error: {}", e)
                }],
                "isError": true
            })),
        }
    }

    // ========================================================================
    // Tool Implementations
    // ========================================================================

    fn tool_transform_caps(&self, args: &Value) -> Result<String, String> {
        let args: TransformCapsArgs = parse_args(args)?;
        let caps = self
            .transform
            .transform_caps(args.direction, &args.caps, args.filter.as_ref());
        to_text(&caps)
    }

    fn tool_fixate_caps(&self, args: &Value) -> Result<String, String> {
        let args: FixateCapsArgs = parse_args(args)?;
        let fixed = self
            .transform
            .fixate_caps(args.direction, &args.caps, args.othercaps)
            .map_err(|e| e.to_string())?;
        Ok(format!("{}\n{}", fixed, to_text(&fixed)?))
    }

    fn tool_set_info(&self, args: &Value) -> Result<String, String> {
        let args: SetInfoArgs = parse_args(args)?;
        self.transform
            .set_caps(&args.in_caps, &args.out_caps)
            .map_err(|e| e.to_string())?;

        let mut query = AllocationQuery::new(args.out_caps);
        let pool = self
            .transform
            .decide_allocation(&mut query)
            .map_err(|e| e.to_string())?;

        Ok(format!(
            "Input and output caps {}.\nOutput pool: {} ({} bytes per buffer)",
            if self.transform.inout_caps_equal() { "are equal" } else { "differ" },
            pool.name(),
            pool.config().size
        ))
    }

    fn tool_set_property(&self, args: &Value) -> Result<String, String> {
        let value: PropertyValue = parse_args(args)?;
        self.transform.set_property(value);
        to_text(&value)
    }

    fn tool_get_property(&self, args: &Value) -> Result<String, String> {
        let args: GetPropertyArgs = parse_args(args)?;
        to_text(&self.transform.property(args.property))
    }

    fn tool_process_frame(&self, args: &Value) -> Result<String, String> {
        let args: ProcessFrameArgs = parse_args(args)?;
        let info = self
            .transform
            .input_info()
            .ok_or("not negotiated, call set_info first")?;

        let mut input = if args.system_memory {
            system_frame(info.size)
        } else {
            let mem = self
                .transform
                .allocator()
                .alloc(info.size, &AllocationParams::default())
                .map_err(|e| e.to_string())?;
            VideoBuffer::physical(mem)
        };
        if !args.no_video_meta {
            let flags = if args.interlaced {
                VideoFrameFlags::INTERLACED
            } else {
                VideoFrameFlags::empty()
            };
            input = input.with_video_meta(VideoMeta {
                width: info.width,
                height: info.height,
                format: info.format,
                flags,
            });
        }
        if let Some(crop) = args.crop {
            input = input.with_crop_meta(crop);
        }
        input = input.with_pts(args.pts_us);

        let blits_before = self.log.len();
        let output = self.transform.process(input).map_err(|e| e.to_string())?;
        let blit = if self.log.len() > blits_before { self.log.last() } else { None };

        let report = json!({
            "passthrough": self.transform.is_passthrough(),
            "output_phys_addr": output.phys_addr().map(|a| format!("0x{:x}", a)),
            "pts_us": output.pts_us,
            "blit": blit,
        });
        if blit.is_some() {
            self.transform.release_output(output);
        }
        to_text(&report)
    }

    fn tool_allocator_stats(&self) -> Result<String, String> {
        to_text(&self.backend.stats())
    }
}

/// A zeroed frame in ordinary heap memory.
fn system_frame(size: usize) -> VideoBuffer {
    VideoBuffer::new(Memory::System(vec![0u8; size].into()))
}

// ============================================================================
// Configuration
// ============================================================================

fn config_path() -> Option<PathBuf> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            return args.next().map(PathBuf::from);
        }
        if let Some(path) = arg.strip_prefix("--config=") {
            return Some(PathBuf::from(path));
        }
    }
    std::env::var_os("PHYSBLIT_CONFIG").map(PathBuf::from)
}

// ============================================================================
// Main Entry Point
// ============================================================================

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("physblit_ctl=info".parse()?),
        )
        .with_writer(io::stderr)
        .init();

    info!("physblit control server v{} starting...", env!("CARGO_PKG_VERSION"));

    let settings = match config_path() {
        Some(path) => TransformSettings::load_or_default(&path),
        None => TransformSettings::default(),
    };
    let mut server = ControlServer::new(settings)?;
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    info!("Listening for requests on stdin...");

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to read stdin: {}", e);
                continue;
            }
        };

        if line.trim().is_empty() {
            continue;
        }

        debug!("Received: {}", line);

        let request: JsonRpcRequest = match serde_json::from_str(&line) {
            Ok(r) => r,
            Err(e) => {
                error!("Failed to parse request: {}", e);
                continue;
            }
        };

        let response = server.handle_request(request);
        let response_json = serde_json::to_string(&response)?;

        debug!("Sending: {}", response_json);
        writeln!(stdout, "{}", response_json)?;
        stdout.flush()?;
    }

    server.transform.deactivate();
    Ok(())
}
