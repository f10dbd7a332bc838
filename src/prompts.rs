//! Prompt templates for the cited-answer generation step.

use crate::chunker::strip_source_header;
use crate::store::Scored;

/// System instruction sent once per turn ahead of the chat history.
///
/// The `[N]` marker syntax is load-bearing: the citation aligner resolves
/// those markers against the numbered references embedded in the user
/// prompt, so the instruction and the reference blocks must stay in step.
pub const SYSTEM_PROMPT: &str = "\
You are a knowledge assistant for a personal note vault. Answer the user's \
question using ONLY the numbered references provided below.

Rules:
1. Base every claim on the references; if they do not contain the answer, \
say so plainly.
2. After each claim, cite the reference that supports it with its number \
in square brackets, e.g. [1] or [2].
3. Place the marker immediately after the statement it supports.
4. If references conflict, acknowledge the conflict and cite both.
5. Do not invent references or numbers beyond those provided.";

/// Embed the retrieved chunks as numbered reference blocks and append the
/// user's question.
///
/// Reference numbering is 1-based and follows retrieval order, matching
/// what the citation aligner expects.
pub fn build_user_prompt(question: &str, references: &[Scored]) -> String {
    let mut prompt = String::from("<references>\n");

    for (i, reference) in references.iter().enumerate() {
        prompt.push_str(&format!(
            "<reference index=\"{}\" fileName=\"{}\">\n{}\n</reference>\n",
            i + 1,
            reference.source_key,
            strip_source_header(&reference.text),
        ));
    }

    prompt.push_str("</references>\n\n<question>\n");
    prompt.push_str(question);
    prompt.push_str("\n</question>");
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scored(source_key: &str, text: &str) -> Scored {
        Scored {
            source_key: source_key.to_string(),
            text: text.to_string(),
            similarity: 0.9,
        }
    }

    #[test]
    fn test_references_numbered_in_order() {
        let refs = vec![
            scored("a.md", "SOURCE: a.md\n\nAlpha facts."),
            scored("b.md", "SOURCE: b.md\n\nBeta facts."),
        ];
        let prompt = build_user_prompt("What about alpha?", &refs);

        assert!(prompt.contains("<reference index=\"1\" fileName=\"a.md\">"));
        assert!(prompt.contains("<reference index=\"2\" fileName=\"b.md\">"));
        let first = prompt.find("fileName=\"a.md\"").unwrap();
        let second = prompt.find("fileName=\"b.md\"").unwrap();
        assert!(first < second);
    }

    #[test]
    fn test_source_header_stripped_from_blocks() {
        let refs = vec![scored("a.md", "SOURCE: a.md\n\nAlpha facts.")];
        let prompt = build_user_prompt("q", &refs);
        assert!(prompt.contains("Alpha facts."));
        assert!(!prompt.contains("SOURCE: a.md\n\nAlpha facts."));
    }

    #[test]
    fn test_question_included() {
        let prompt = build_user_prompt("Why is the sky blue?", &[]);
        assert!(prompt.contains("Why is the sky blue?"));
    }
}
