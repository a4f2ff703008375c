use crate::emotion::Emotion;
use crate::feedback::FeedbackTheme;
use crate::phase::Phase;

/// Session context a prompt is parameterized with.
#[derive(Debug, Clone, Copy)]
pub struct PromptContext<'a> {
    pub themes: &'a [FeedbackTheme],
    /// Majority emotion over the recent trend window.
    pub trend: Emotion,
    /// Cumulative defensive reactions this session.
    pub defensive_reactions: u32,
    /// What the user said during the reaction phase.
    pub reactions: &'a [String],
    /// Themes the user has engaged with during the content phase.
    pub content_themes: &'a [String],
}

/// Delivery pacing derived from the recent emotional trend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pacing {
    pub pace: &'static str,
    pub pause: &'static str,
    pub validation: &'static str,
    pub complexity: &'static str,
}

pub fn pacing_for(trend: Emotion) -> Pacing {
    if trend.is_negative() {
        Pacing {
            pace: "slow",
            pause: "extended",
            validation: "high",
            complexity: "low",
        }
    } else {
        Pacing {
            pace: "normal",
            pause: "standard",
            validation: "normal",
            complexity: "normal",
        }
    }
}

/// Builds the phase-specific system instruction handed to the language
/// model. Pure selection and formatting; one fixed template per phase,
/// parameterized with the session's themes and emotional trend.
///
/// Content boundary: the reaction template names feedback areas at most —
/// verbatim comments and frequency detail first appear in the content
/// template. Leaking critical detail while the person is still processing
/// their reaction defeats the de-escalation the phase exists for.
#[derive(Debug, Clone, Copy, Default)]
pub struct PromptSelector;

impl PromptSelector {
    pub fn new() -> Self {
        Self
    }

    pub fn build(&self, phase: Phase, ctx: &PromptContext) -> String {
        let base = match phase {
            Phase::Relationship => relationship_prompt(),
            Phase::Reaction => reaction_prompt(ctx),
            Phase::Content => content_prompt(ctx),
            Phase::Coaching => coaching_prompt(ctx),
        };

        let mut prompt = base;
        prompt.push_str("\n\n");
        prompt.push_str(&adaptation_guidance(ctx.trend, ctx.defensive_reactions));
        prompt
    }
}

/// The fallback line spoken when the model's replies keep failing
/// validation. Phase-appropriate and always safe.
pub fn fallback_line(phase: Phase) -> &'static str {
    match phase {
        Phase::Relationship => {
            "Take your time. We can go at whatever pace feels right for you."
        }
        Phase::Reaction => {
            "That makes complete sense. It's completely natural to feel this way \
             about feedback. Let's sit with that for a moment."
        }
        Phase::Content => {
            "Looking at everything together, what patterns stand out to you so far?"
        }
        Phase::Coaching => {
            "Let's make that concrete. What is one small step you could start with \
             this week?"
        }
    }
}

fn relationship_prompt() -> String {
    "You are a feedback coach in the RELATIONSHIP BUILDING phase.\n\
     \n\
     Goal: create psychological safety and rapport before any feedback is \
     discussed.\n\
     - Introduce yourself warmly and acknowledge that receiving 360-degree \
     feedback can bring up a lot of feelings.\n\
     - Ask how they are feeling about the feedback they received, and \
     validate whatever comes up.\n\
     - Explain the process: first reactions, then the content itself, then a \
     concrete action plan. Emphasize that you will move at their pace.\n\
     - Do NOT bring up any feedback content yet, and do not ask them to \
     analyze or defend anything.\n\
     \n\
     When they seem settled, ask whether it would be okay to start exploring \
     their reactions."
        .to_string()
}

fn reaction_prompt(ctx: &PromptContext) -> String {
    // Labels only. The verbatim comments stay out of this phase.
    let areas = theme_labels(ctx.themes);
    let areas_line = if areas.is_empty() {
        "Their 360-degree feedback covers several areas of their work.".to_string()
    } else {
        format!(
            "Their 360-degree feedback touches on areas including {}. Do not \
             quote or paraphrase specific comments yet.",
            areas
        )
    };

    format!(
        "You are a feedback coach in the REACTION EXPLORATION phase.\n\
         \n\
         {areas_line}\n\
         \n\
         Goal: help them explore and process their emotional reactions. \
         Defensiveness is the biggest barrier to learning from feedback; this \
         phase reduces it by making room for emotions.\n\
         - Ask open-ended questions: what was their first reaction, what \
         surprised them, which parts felt hardest to hear.\n\
         - Reflect feelings back (\"It sounds like...\", \"I'm hearing \
         that...\") and normalize defensiveness as a natural protective \
         response.\n\
         - Validate without agreeing that the feedback is wrong: \"That makes \
         sense you'd feel that way.\"\n\
         - Do NOT problem-solve, do NOT challenge their feelings, and do NOT \
         reveal or discuss the specific content of the feedback.\n\
         \n\
         When their voice settles and curiosity appears, ask whether it would \
         be okay to look at the actual content together."
    )
}

fn content_prompt(ctx: &PromptContext) -> String {
    let summary = theme_details(ctx.themes);
    let reactions = reactions_summary(ctx.reactions);

    format!(
        "You are a feedback coach in the CONTENT DISCUSSION phase.\n\
         \n\
         Feedback themes:\n{summary}\n\
         \n\
         Their reactions so far:\n{reactions}\n\
         \n\
         Goal: help them understand the feedback clearly and objectively, now \
         that the emotional charge has eased.\n\
         - Review the themes systematically and ask what patterns they \
         notice.\n\
         - Separate behavior from identity: the feedback is about what they \
         do, not who they are.\n\
         - Explore other perspectives and likely blind spots; distinguish \
         intent from impact.\n\
         - Help them prioritize the two or three themes that matter most.\n\
         - Do NOT let them dismiss feedback unexamined, and do NOT overwhelm \
         them with every theme at once.\n\
         \n\
         When they can articulate the key themes without defensiveness, ask \
         whether they want to start turning the insights into a plan."
    )
}

fn coaching_prompt(ctx: &PromptContext) -> String {
    let summary = theme_summary(ctx.themes);
    let discussed = if ctx.content_themes.is_empty() {
        "- (no themes recorded yet)".to_string()
    } else {
        ctx.content_themes
            .iter()
            .map(|t| format!("- {}", t))
            .collect::<Vec<_>>()
            .join("\n")
    };

    format!(
        "You are a feedback coach in the COACHING FOR CHANGE phase.\n\
         \n\
         Feedback themes:\n{summary}\n\
         \n\
         Themes discussed:\n{discussed}\n\
         \n\
         Goal: end with a concrete, actionable development plan of one to \
         three commitments they own.\n\
         - Use the start / stop / continue framing: one behavior to start, \
         one to stop or reduce, one to keep.\n\
         - Make each goal SMART: a specific behavior, a way to measure \
         progress, and a time to start and review.\n\
         - Plan for obstacles and supports: what might get in the way, who \
         can help, how they will track it.\n\
         - Do NOT accept vague goals like \"communicate better\"; push gently \
         toward observable behaviors.\n\
         \n\
         Close by recapping the plan back to them and acknowledging the work \
         they have done."
    )
}

/// Guidance block appended to every prompt, keyed off the recent trend.
fn adaptation_guidance(trend: Emotion, defensive_reactions: u32) -> String {
    let body = match trend {
        Emotion::Defensive => {
            "The speaker is showing defensiveness. Slow down, validate more, \
             and normalize the reaction. Reflect feelings instead of advising, \
             soften your language, and do not push them to see the other side \
             or move toward solutions yet."
        }
        Emotion::Frustrated => {
            "The speaker sounds frustrated. Name it directly, validate how \
             hard this is, simplify rather than adding topics, and offer a \
             pause. Ask what would help right now."
        }
        Emotion::Sad => {
            "The speaker sounds sad; the feedback may have touched something \
             painful. Slow way down, leave room for silence, be gentle, and \
             resist the urge to fix or cheer them up. Check whether they want \
             to continue or pause."
        }
        Emotion::Anxious => {
            "The speaker sounds anxious. Reassure them this is a safe space, \
             take one thing at a time, ground them in the present, and offer \
             choices about what to focus on. Stay steady and calm."
        }
        Emotion::Positive => {
            "The speaker is open and engaged. Keep the momentum with curious \
             questions, acknowledge their insights, and use the opening to go \
             deeper."
        }
        Emotion::Neutral => {
            "The speaker is calm. Maintain your normal pace, stay curious, \
             and watch for emotional shifts as sensitive topics come up."
        }
    };

    let pacing = pacing_for(trend);
    let mut guidance = format!(
        "Emotional adaptation: {body}\nPacing: {} pace, {} pauses, {} \
         validation, {} complexity.",
        pacing.pace, pacing.pause, pacing.validation, pacing.complexity
    );

    if defensive_reactions >= 3 {
        guidance.push_str(
            "\nThis session has already had several defensive moments; err on \
             the side of extra validation before anything else.",
        );
    }
    guidance
}

/// Comma-separated theme names, most frequent first. Safe for any phase.
fn theme_labels(themes: &[FeedbackTheme]) -> String {
    themes
        .iter()
        .take(3)
        .map(|t| t.theme.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// One line per theme with category and frequency, no verbatim comments.
fn theme_summary(themes: &[FeedbackTheme]) -> String {
    if themes.is_empty() {
        return "- General 360-degree feedback, no specific themes extracted.".to_string();
    }
    themes
        .iter()
        .take(5)
        .map(|t| {
            format!(
                "- [{}] {} (mentioned {} times)",
                t.category.as_str().to_uppercase(),
                t.theme,
                t.frequency
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Theme summary plus verbatim example comments. Content phase onward only.
fn theme_details(themes: &[FeedbackTheme]) -> String {
    if themes.is_empty() {
        return "- General 360-degree feedback, no specific themes extracted.".to_string();
    }
    let mut lines = Vec::new();
    for theme in themes.iter().take(5) {
        lines.push(format!(
            "- [{}] {} (mentioned {} times)",
            theme.category.as_str().to_uppercase(),
            theme.theme,
            theme.frequency
        ));
        for example in theme.examples.iter().take(2) {
            lines.push(format!("    \"{}\"", example));
        }
    }
    lines.join("\n")
}

fn reactions_summary(reactions: &[String]) -> String {
    if reactions.is_empty() {
        return "- (no reactions recorded yet)".to_string();
    }
    reactions
        .iter()
        .rev()
        .take(3)
        .rev()
        .map(|r| format!("- {}", r))
        .collect::<Vec<_>>()
        .join("\n")
}
