use crate::core::catalog::{BodyPart, TaskKey, ViewAngle};
use crate::core::state::CharacterAttributes;

/// Prompt for the reference sheet every part is extracted from.
pub fn reference_prompt(attrs: &CharacterAttributes) -> String {
    format!(
        "Create a 2D character design reference sheet for animation production.\n\
         \n\
         CHARACTER:\n\
         - Role: {role}\n\
         - Age: {age}, Gender: {gender}\n\
         - Body type: {body_type}\n\
         - Skin tone: {skin_tone}\n\
         - Hair: {hair_color} {hair_style}\n\
         - Clothing: {clothing}\n\
         - Accessories: {accessories}\n\
         - Art style: {art_style}\n\
         \n\
         LAYOUT: two poses side by side.\n\
         1. FRONT view, T-pose with arms extended horizontally\n\
         2. SIDE view (right profile), arms at the sides\n\
         \n\
         REQUIREMENTS:\n\
         - Pure white (#FFFFFF) background\n\
         - Clean vector-style line art with consistent stroke weight\n\
         - Flat cel shading, no gradients\n\
         - Full body visible from head to feet, centered in each view\n\
         - Sharp edges suitable for rigging",
        role = attrs.role,
        age = attrs.age,
        gender = attrs.gender,
        body_type = attrs.body_type,
        skin_tone = attrs.skin_tone,
        hair_color = attrs.hair_color,
        hair_style = attrs.hair_style,
        clothing = attrs.clothing,
        accessories = attrs.accessories,
        art_style = attrs.art_style,
    )
}

/// Prompt for extracting one part from the reference image.
///
/// Character details come from the attached reference, so only the technical
/// requirements are spelled out.
pub fn part_prompt(key: TaskKey) -> String {
    format!(
        "Extract the {part}, {view} from the reference image.\n\
         \n\
         REQUIREMENTS:\n\
         - ISOLATED: only this body part, detached from the rest of the body\n\
         - BACKGROUND: solid #00FF00 green chroma key\n\
         - CENTERED with padding around the edges\n\
         - STYLE: match the reference exactly, flat cel shading, vector line art\n\
         - JOINTS: include overlap at the joints for rigging\n\
         - Square aspect ratio",
        part = part_description(key.body_part),
        view = view_description(key.view_angle),
    )
}

fn part_description(part: BodyPart) -> &'static str {
    match part {
        BodyPart::Head => "HEAD (face, hair, ears, neck down to the collar)",
        BodyPart::Torso => "TORSO (neck to hips, no arms or legs)",
        BodyPart::LeftArm => "LEFT ARM (shoulder to fingertips)",
        BodyPart::RightArm => "RIGHT ARM (shoulder to fingertips)",
        BodyPart::LeftLeg => "LEFT LEG (hip to foot)",
        BodyPart::RightLeg => "RIGHT LEG (hip to foot)",
    }
}

fn view_description(view: ViewAngle) -> &'static str {
    match view {
        ViewAngle::Front => "FRONT view",
        ViewAngle::Side => "SIDE view (right profile)",
        ViewAngle::ThreeQuarter => "3/4 view (facing right)",
        ViewAngle::Back => "BACK view",
    }
}
