use super::{Classification, ClassifyError, Verdict};

pub fn on_task_prompt(task: &str) -> String {
    format!(
        "You're a diligent productivity checker whose job is to review my desktop and ensure I'm \
         staying on-task. Is this image consistent with working on the following task: '{task}'? \
         Answer with ONLY 'yes' or 'no'."
    )
}

pub fn apology_prompt(task: &str) -> String {
    format!(
        "Generate a short apologetic message (1-2 sentences) from someone who got distracted \
         instead of working on this task: '{task}'. Make it sincere and remorseful. Keep it under \
         100 characters. Only respond with the message, nothing else."
    )
}

/// Reads the verdict from the first word of the reply. Models like to decorate a bare yes/no with
/// quotes, punctuation or an explanation; the explanation is kept as the rationale.
pub fn parse_classification(text: &str) -> Result<Classification, ClassifyError> {
    let text = text.trim();
    let (first, rest) = match text.find(char::is_whitespace) {
        Some(split) => (&text[..split], text[split..].trim()),
        None => (text, ""),
    };

    let word = first
        .trim_matches(|c: char| !c.is_alphanumeric())
        .to_lowercase();
    let verdict = match word.as_str() {
        "yes" => Verdict::OnTask,
        "no" => Verdict::OffTask,
        _ => return Err(ClassifyError::MalformedResponse(text.to_string())),
    };

    let rationale = rest.trim_start_matches(|c: char| c == ',' || c == '.' || c == '-');
    let rationale = rationale.trim();
    Ok(Classification {
        verdict,
        rationale: (!rationale.is_empty()).then(|| rationale.to_string()),
    })
}
