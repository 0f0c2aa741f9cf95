//! Instruction text handed to the analysis engine

use std::path::Path;

/// Build the instruction for one analysis run.
///
/// The engine receives no structured input besides this text, so the log
/// location and the full instinct file schema are spelled out here.
#[must_use]
pub fn build_prompt(log_path: &Path, instincts_dir: &Path) -> String {
    format!(
        "Read {log} and identify recurring patterns in how tools are used \
(user corrections, error resolutions, repeated workflows, tool preferences).\n\
If you find 3 or more occurrences of the same pattern, create or update an instinct file in \
{dir}/<id>.md. If a file for that id already exists, update it in place instead of creating \
a second one.\n\
\n\
Every instinct file MUST use this exact format:\n\
\n\
---\n\
id: kebab-case-name\n\
trigger: \"when <specific condition>\"\n\
confidence: <number between 0.3 and 0.85 based on frequency: 3-5 times=0.5, 6-10=0.7, 11+=0.85>\n\
domain: <one of: code-style, testing, git, debugging, workflow, tooling, communication, security, architecture>\n\
source: session-observation\n\
---\n\
\n\
# Title\n\
\n\
## Action\n\
<what to do, one clear sentence>\n\
\n\
## Evidence\n\
- Observed N times in session <id>\n\
- Pattern: <description>\n\
- Last observed: <date>\n\
\n\
Be conservative: only create instincts for clear patterns with 3+ observations.",
        log = log_path.display(),
        dir = instincts_dir.display(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_names_paths_and_schema() {
        let prompt = build_prompt(
            Path::new("/hm/observations.jsonl"),
            Path::new("/hm/instincts/personal"),
        );
        assert!(prompt.contains("/hm/observations.jsonl"));
        assert!(prompt.contains("/hm/instincts/personal/<id>.md"));
        for field in ["id:", "trigger:", "confidence:", "domain:", "source:"] {
            assert!(prompt.contains(field), "missing {field}");
        }
        assert!(prompt.contains("0.3 and 0.85"));
    }
}
