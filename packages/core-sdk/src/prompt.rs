use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::{ListingForm, Message};

/** \brief 标题最大字符数。 */
pub const TITLE_MAX_CHARS: usize = 200;
/** \brief 五点描述的条数。 */
pub const BULLET_COUNT: usize = 5;

pub const TITLE_PERSONA: &str = "You write Amazon listing copy professionally.";
pub const BULLETS_PERSONA: &str = "You write Amazon listing bullet points professionally.";

const BASE_ROLE: &str = "You are a professional Amazon listing expert. Generate optimized title and/or 5 bullets based on the inputs:";

const TITLE_RULES: [&str; 4] = [
    "1. <= 200 English characters, aim as close to 200 as possible",
    "2. Put the most important/relevant keywords toward the front",
    "3. No word repetition > 2 times (excluding prepositions)",
    "4. Include scenarios, attributes, benefits and features; keep fluent",
];

const BULLET_RULES: [&str; 6] = [
    "1. Return exactly 5 bullet points.",
    "2. Emphasize key benefits, specs and differentiators",
    "3. Each bullet starts with an ALL-CAPS heading, followed by \":\".",
    "4. No square brackets anywhere.",
    "5. No period at the end of each bullet.",
    "6. End the response with no additional commentary.",
];

static LINE_BREAK: Lazy<Regex> = Lazy::new(|| Regex::new(r"\r?\n").expect("valid regex"));
static LEADING_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[-*•\d.)\s]+").expect("valid regex"));

/**
 * \brief 提示词类型：仅标题、仅五点或合并输出。
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptKind {
    Title,
    Bullets,
    Combined,
}

/**
 * \brief 根据表单输入组装用户提示词。
 */
pub fn build_prompt(kind: PromptKind, form: &ListingForm) -> String {
    let title_req = TITLE_RULES.join("\n");
    let bullet_req = BULLET_RULES.join("\n");
    let common = format!(
        "\n[Keywords]\n{}\n\n[Product Notes]\n{}\n\n[Competitor Titles]\n{}\n\n[Competitor Bullets]\n{}",
        form.keywords.trim(),
        form.features.trim(),
        form.comp_title.trim(),
        form.comp_bullets.trim()
    );

    match kind {
        PromptKind::Title => format!(
            "{BASE_ROLE}\n[Title Requirements]:\n{title_req}\n{common}\n\nOutput the English title only."
        ),
        PromptKind::Bullets => format!(
            "{BASE_ROLE}\n[Bullet Requirements]\n{bullet_req}\n{common}\n\nOutput the 5-bullet list only."
        ),
        PromptKind::Combined => format!(
            "{BASE_ROLE}\n[Title Requirements]:\n{title_req}\n\n[Bullet Requirements]\n{bullet_req}\n{common}\n\nOutput the English title in one line, then the 5-bullet list."
        ),
    }
}

/**
 * \brief 构造两条消息的对话：system 角色设定 + user 提示词。
 */
pub fn conversation(kind: PromptKind, form: &ListingForm) -> Vec<Message> {
    let persona = match kind {
        PromptKind::Bullets => BULLETS_PERSONA,
        PromptKind::Title | PromptKind::Combined => TITLE_PERSONA,
    };
    vec![Message::system(persona), Message::user(build_prompt(kind, form))]
}

/**
 * \brief 标题清理：换行替换为空格、去首尾空白并截断至 200 字符。
 */
pub fn clean_title(text: &str) -> String {
    text.replace('\n', " ")
        .trim()
        .chars()
        .take(TITLE_MAX_CHARS)
        .collect()
}

pub fn title_len(title: &str) -> usize {
    title.chars().count()
}

/**
 * \brief 五点清理：去除方括号、列表标记与行尾句点，最多保留 5 行。
 */
pub fn sanitize_bullets(text: &str) -> String {
    let stripped = text.replace(['[', ']'], "");
    LINE_BREAK
        .split(&stripped)
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            let unmarked = LEADING_MARKER.replace(line, "");
            let unmarked: &str = &unmarked;
            unmarked.strip_suffix('.').unwrap_or(unmarked).to_string()
        })
        .take(BULLET_COUNT)
        .collect::<Vec<_>>()
        .join("\n")
}
