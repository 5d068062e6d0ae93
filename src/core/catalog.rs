use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BodyPart {
    Head,
    Torso,
    LeftArm,
    RightArm,
    LeftLeg,
    RightLeg,
}

impl BodyPart {
    pub const ALL: [BodyPart; 6] = [
        BodyPart::Head,
        BodyPart::Torso,
        BodyPart::LeftArm,
        BodyPart::RightArm,
        BodyPart::LeftLeg,
        BodyPart::RightLeg,
    ];

    /// Stable identifier, also used for cache paths and plain file names.
    pub fn id(&self) -> &'static str {
        match self {
            BodyPart::Head => "head",
            BodyPart::Torso => "torso",
            BodyPart::LeftArm => "leftArm",
            BodyPart::RightArm => "rightArm",
            BodyPart::LeftLeg => "leftLeg",
            BodyPart::RightLeg => "rightLeg",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            BodyPart::Head => "Head",
            BodyPart::Torso => "Torso",
            BodyPart::LeftArm => "L Arm",
            BodyPart::RightArm => "R Arm",
            BodyPart::LeftLeg => "L Leg",
            BodyPart::RightLeg => "R Leg",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ViewAngle {
    Front,
    Side,
    ThreeQuarter,
    Back,
}

impl ViewAngle {
    pub const ALL: [ViewAngle; 4] = [
        ViewAngle::Front,
        ViewAngle::Side,
        ViewAngle::ThreeQuarter,
        ViewAngle::Back,
    ];

    pub fn id(&self) -> &'static str {
        match self {
            ViewAngle::Front => "front",
            ViewAngle::Side => "side",
            ViewAngle::ThreeQuarter => "threeQuarter",
            ViewAngle::Back => "back",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            ViewAngle::Front => "Front",
            ViewAngle::Side => "Side",
            ViewAngle::ThreeQuarter => "3/4",
            ViewAngle::Back => "Back",
        }
    }
}

/// Identity of one generation unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskKey {
    pub body_part: BodyPart,
    pub view_angle: ViewAngle,
}

impl TaskKey {
    pub const fn new(body_part: BodyPart, view_angle: ViewAngle) -> Self {
        Self {
            body_part,
            view_angle,
        }
    }
}

impl fmt::Display for TaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.body_part.id(), self.view_angle.id())
    }
}

pub const TASK_COUNT: usize = BodyPart::ALL.len() * ViewAngle::ALL.len();

/// Every task key in catalog order: body part major, view angle minor.
pub fn all_task_keys() -> Vec<TaskKey> {
    BodyPart::ALL
        .iter()
        .flat_map(|part| ViewAngle::ALL.iter().map(move |view| TaskKey::new(*part, *view)))
        .collect()
}
