use crate::core::config::Config;
use crate::core::state::{BodyType, CharacterAttributes};
use crate::services::generation::gemini::GeminiConfig;
use anyhow::{Context, Result};
use inquire::{Confirm, Password, Select, Text};
use log::info;

/// Makes sure the provider is usable and returns the character to generate.
///
/// Unattended runs take the character straight from the config; otherwise
/// each attribute is prompted for, pre-filled with the configured value.
pub fn run_setup(config: &mut Config) -> Result<CharacterAttributes> {
    let mut needs_save = false;

    if config.generation.provider == "gemini" && !has_gemini_key(config) {
        if config.unattended {
            anyhow::bail!("generation.gemini.api_key is required in unattended mode");
        }
        let api_key = Password::new("Gemini API key:")
            .without_confirmation()
            .prompt()?;
        match config.generation.gemini.as_mut() {
            Some(gemini) => gemini.api_key = api_key,
            None => config.generation.gemini = Some(GeminiConfig::new(api_key)),
        }
        needs_save = true;
    }

    let attributes = if config.unattended {
        unattended_attributes(config)?
    } else {
        let defaults = config.character.clone().unwrap_or_else(default_character);
        let attributes = prompt_attributes(&defaults)?;
        if config.character.as_ref() != Some(&attributes)
            && Confirm::new("Save these attributes to config.yml?")
                .with_default(true)
                .prompt()?
        {
            config.character = Some(attributes.clone());
            needs_save = true;
        }
        attributes
    };

    if needs_save {
        config.save()?;
        println!("Configuration saved.");
    }

    info!("Character: {} ({})", attributes.role, attributes.fingerprint());
    Ok(attributes)
}

fn has_gemini_key(config: &Config) -> bool {
    config
        .generation
        .gemini
        .as_ref()
        .is_some_and(|g| !g.api_key.trim().is_empty())
}

fn unattended_attributes(config: &Config) -> Result<CharacterAttributes> {
    config
        .character
        .clone()
        .context("Unattended mode requires a `character` section in config.yml")
}

/// Starting point offered to first-time users.
pub fn default_character() -> CharacterAttributes {
    CharacterAttributes {
        role: "Fantasy warrior".to_string(),
        age: "Young adult".to_string(),
        gender: "Female".to_string(),
        clothing: "Leather armor with a red cloak".to_string(),
        accessories: "Sword on the back".to_string(),
        art_style: "Anime, cel shaded".to_string(),
        skin_tone: "Light".to_string(),
        hair_color: "Dark brown".to_string(),
        hair_style: "Long ponytail".to_string(),
        body_type: BodyType::Athletic,
    }
}

fn prompt_attributes(defaults: &CharacterAttributes) -> Result<CharacterAttributes> {
    let ask = |label: &str, default: &str| -> Result<String> {
        Ok(Text::new(label).with_default(default).prompt()?)
    };

    let role = ask("Role:", &defaults.role)?;
    let age = ask("Age:", &defaults.age)?;
    let gender = ask("Gender:", &defaults.gender)?;
    let body_type_cursor = BodyType::ALL
        .iter()
        .position(|b| *b == defaults.body_type)
        .unwrap_or(0);
    let body_type = Select::new("Body type:", BodyType::ALL.to_vec())
        .with_starting_cursor(body_type_cursor)
        .prompt()?;
    let skin_tone = ask("Skin tone:", &defaults.skin_tone)?;
    let hair_color = ask("Hair color:", &defaults.hair_color)?;
    let hair_style = ask("Hair style:", &defaults.hair_style)?;
    let clothing = ask("Clothing:", &defaults.clothing)?;
    let accessories = ask("Accessories:", &defaults.accessories)?;
    let art_style = ask("Art style:", &defaults.art_style)?;

    Ok(CharacterAttributes {
        role,
        age,
        gender,
        clothing,
        accessories,
        art_style,
        skin_tone,
        hair_color,
        hair_style,
        body_type,
    })
}
