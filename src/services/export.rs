use crate::core::catalog::{BodyPart, ViewAngle, TASK_COUNT};
use crate::core::io::Storage;
use crate::core::state::{OverallStatus, Session, TaskStatus};
use anyhow::{bail, Context, Result};
use chrono::Utc;
use log::info;
use serde::{Deserialize, Serialize};
use std::path::Path;

const MAX_NAME_LENGTH: usize = 30;
const REFERENCE_FILE: &str = "_reference_sheet.png";
const METADATA_FILE: &str = "_metadata.json";
const EXPORT_FORMAT: &str = "Moho/Anime Studio";

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum NamingConvention {
    #[default]
    Moho,
    Spine,
    Plain,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ExportConfig {
    #[serde(default)]
    pub naming: NamingConvention,
    #[serde(default = "default_include_reference")]
    pub include_reference: bool,
}

fn default_include_reference() -> bool {
    true
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            naming: NamingConvention::default(),
            include_reference: default_include_reference(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ExportManifest {
    character_name: String,
    exported_at: String,
    format: &'static str,
    total_parts: usize,
    completed_parts: usize,
    parts: Vec<ManifestPart>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ManifestPart {
    filename: String,
    body_part: BodyPart,
    view: ViewAngle,
    folder: &'static str,
    suggested_bone: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportSummary {
    pub folder: String,
    pub parts_written: usize,
    pub reference_written: bool,
}

pub fn file_name(part: BodyPart, view: ViewAngle, naming: NamingConvention) -> String {
    match naming {
        NamingConvention::Moho => {
            let part_name = match part {
                BodyPart::Head => "head",
                BodyPart::Torso => "body",
                BodyPart::LeftArm => "arm_L",
                BodyPart::RightArm => "arm_R",
                BodyPart::LeftLeg => "leg_L",
                BodyPart::RightLeg => "leg_R",
            };
            format!("{}_{}.png", part_name, view_folder(view))
        }
        NamingConvention::Spine => {
            let part_name = match part {
                BodyPart::Head => "head",
                BodyPart::Torso => "torso",
                BodyPart::LeftArm => "arm-left",
                BodyPart::RightArm => "arm-right",
                BodyPart::LeftLeg => "leg-left",
                BodyPart::RightLeg => "leg-right",
            };
            format!("{}-{}.png", part_name, view.id())
        }
        NamingConvention::Plain => format!("{}_{}.png", part.id(), view.id()),
    }
}

pub fn view_folder(view: ViewAngle) -> &'static str {
    match view {
        ViewAngle::Front => "front",
        ViewAngle::Side => "side",
        ViewAngle::ThreeQuarter => "3q",
        ViewAngle::Back => "back",
    }
}

pub fn suggested_bone(part: BodyPart) -> &'static str {
    match part {
        BodyPart::Head => "bone_head",
        BodyPart::Torso => "bone_body",
        BodyPart::LeftArm => "bone_arm_L",
        BodyPart::RightArm => "bone_arm_R",
        BodyPart::LeftLeg => "bone_leg_L",
        BodyPart::RightLeg => "bone_leg_R",
    }
}

/// Folder-safe character name: `[A-Za-z0-9_-]` only, at most 30 characters.
pub fn sanitize_name(name: &str) -> String {
    let safe: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .take(MAX_NAME_LENGTH)
        .collect();

    if safe.is_empty() {
        "character".to_string()
    } else {
        safe
    }
}

fn join(root: &str, parts: &[&str]) -> String {
    parts
        .iter()
        .fold(Path::new(root).to_path_buf(), |path, part| path.join(part))
        .to_string_lossy()
        .to_string()
}

/// Writes every completed part into `<output_root>/<name>/<view>/`, plus the
/// reference sheet and a `_metadata.json` manifest.
pub async fn export_session(
    session: &Session,
    config: &ExportConfig,
    storage: &dyn Storage,
    output_root: &str,
) -> Result<ExportSummary> {
    if session.overall_status() != OverallStatus::Complete {
        bail!(
            "Session {} is {}, only complete sessions can be exported",
            session.id(),
            session.overall_status()
        );
    }

    let safe_name = sanitize_name(&session.attributes().role);
    let folder = join(output_root, &[safe_name.as_str()]);
    info!("Exporting session {} to {}", session.id(), folder);

    let mut parts = Vec::new();
    for task in session.tasks() {
        if task.status != TaskStatus::Complete {
            continue;
        }
        let Some(image) = task.output_image() else {
            continue;
        };

        let key = task.key;
        let filename = file_name(key.body_part, key.view_angle, config.naming);
        let view_dir = view_folder(key.view_angle);
        let png = image
            .to_png()
            .with_context(|| format!("Failed to encode {} as PNG", key))?;
        storage
            .write(&join(&folder, &[view_dir, filename.as_str()]), png.bytes())
            .await
            .with_context(|| format!("Failed to write {}", filename))?;

        parts.push(ManifestPart {
            filename,
            body_part: key.body_part,
            view: key.view_angle,
            folder: view_dir,
            suggested_bone: suggested_bone(key.body_part),
        });
    }

    let mut reference_written = false;
    if config.include_reference {
        if let Some(sheet) = session.reference_sheet() {
            let png = sheet
                .image
                .to_png()
                .context("Failed to encode reference sheet as PNG")?;
            storage
                .write(&join(&folder, &[REFERENCE_FILE]), png.bytes())
                .await
                .context("Failed to write reference sheet")?;
            reference_written = true;
        }
    }

    let manifest = ExportManifest {
        character_name: safe_name,
        exported_at: Utc::now().to_rfc3339(),
        format: EXPORT_FORMAT,
        total_parts: TASK_COUNT,
        completed_parts: parts.len(),
        parts,
    };
    storage
        .write(
            &join(&folder, &[METADATA_FILE]),
            serde_json::to_string_pretty(&manifest)?.as_bytes(),
        )
        .await
        .context("Failed to write export metadata")?;

    info!(
        "Exported {} parts to {}",
        manifest.completed_parts, folder
    );
    Ok(ExportSummary {
        folder,
        parts_written: manifest.completed_parts,
        reference_written,
    })
}
