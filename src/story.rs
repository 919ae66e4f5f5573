use crate::api::lmstudio::TextModel;
use crate::config::Config;
use crate::{logi, logok, logw};
use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use rand::Rng;
use rand::seq::SliceRandom;
use regex::Regex;
use std::path::{Path, PathBuf};
use tokio::fs;

pub const TITLE_FILE: &str = "title.txt";
pub const STORY_FILE: &str = "story.txt";

const QUESTION_WORDS: &[&str] = &["Who", "What", "When", "Where", "Why", "How", "Which"];
const MIN_TEMPERATURE: f64 = 0.3;
const MAX_TEMPERATURE: f64 = 1.2;

const STORY_INSTRUCTION: &str = "Always keep the shared title as the first line of the story & do not make several paragraphs, give the entire story in one single paragraph";

static BLANK_RUNS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n\s*\n").unwrap());
static UNSAFE_FOLDER_CHARS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\w\-_ ]").unwrap());

#[derive(Debug, Clone)]
pub struct StoryOutput {
    pub title: String,
    pub story: String,
    pub folder: PathBuf,
}

pub fn random_question<R: Rng + ?Sized>(rng: &mut R) -> &'static str {
    QUESTION_WORDS.choose(rng).copied().unwrap_or("What")
}

pub fn random_temperature<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    (rng.gen_range(MIN_TEMPERATURE..=MAX_TEMPERATURE) * 100.0).round() / 100.0
}

/// Drops a leading reasoning block (everything through the first `</think>`)
/// and collapses runs of blank lines.
pub fn remove_think_sections(text: &str) -> String {
    let tail = match text.find("</think>") {
        Some(i) => &text[i + "</think>".len()..],
        None => text,
    };
    BLANK_RUNS.replace_all(tail, "\n\n").trim().to_string()
}

pub fn sanitize_folder_name(title: &str) -> String {
    let cleaned = UNSAFE_FOLDER_CHARS.replace_all(title, "");
    let name = cleaned.trim().replace(' ', "_");
    if name.is_empty() { "story".to_string() } else { name }
}

async fn read_prompt(path: &Path) -> Result<String> {
    fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read system prompt {}", path.display()))
}

async fn write_text_file(folder: &Path, name: &str, content: &str) -> Result<()> {
    let path = folder.join(name);
    fs::write(&path, content)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))
}

/// Produces the title, the story and the run folder holding both.
///
/// Model failures fall back to canned text; missing prompt files or an
/// unwritable output base fail the call.
pub async fn generate_text_content(model: &dyn TextModel, cfg: &Config, custom_title: Option<&str>) -> Result<StoryOutput> {
    logi("Reading system prompts...");
    let title_prompt = read_prompt(&cfg.title_prompt_path).await?;
    let story_prompt = read_prompt(&cfg.story_prompt_path).await?;

    let (question, title_temp, story_temp) = {
        let mut rng = rand::thread_rng();
        (random_question(&mut rng), random_temperature(&mut rng), random_temperature(&mut rng))
    };

    let title = match custom_title.map(str::trim).filter(|t| !t.is_empty()) {
        Some(custom) => {
            logi(format!("Using custom title: {}", custom));
            custom.to_string()
        }
        None => {
            logi(format!("Generating title (prompt '{}', temperature {})...", question, title_temp));
            let fallback = format!("Generated Story - {}", question);
            match model.respond(&title_prompt, question, title_temp).await {
                Ok(raw) => {
                    let cleaned = remove_think_sections(&raw);
                    if cleaned.is_empty() { fallback } else { cleaned }
                }
                Err(err) => {
                    logw(format!("Failed to generate title, using fallback: {:#}", err));
                    fallback
                }
            }
        }
    };

    let folder = cfg.output_base.join(sanitize_folder_name(&title));
    fs::create_dir_all(&folder)
        .await
        .with_context(|| format!("Failed to create dir {}", folder.display()))?;
    write_text_file(&folder, TITLE_FILE, &title).await?;
    logok(format!("Title saved: {}", title));

    logi(format!("Generating story (temperature {})...", story_temp));
    let user = format!("{}\n{}", STORY_INSTRUCTION, title);
    let fallback = format!("{}\n\nThis is a generated story about the topic above.", title);
    let story = match model.respond(&story_prompt, &user, story_temp).await {
        Ok(raw) => {
            let cleaned = remove_think_sections(&raw);
            if cleaned.is_empty() { fallback } else { cleaned }
        }
        Err(err) => {
            logw(format!("Failed to generate story, using fallback: {:#}", err));
            fallback
        }
    };
    write_text_file(&folder, STORY_FILE, &story).await?;
    logok(format!("Story saved ({} chars)", story.chars().count()));

    Ok(StoryOutput { title, story, folder })
}
