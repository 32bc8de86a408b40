//! Prompt templates for the healthcare chains.

const GUIDELINES: &str = "You can also greet people when they greet you. If you are asked questions \
about anything other than healthcare, you need to politely inform the user that you are a healthcare \
assistant and can only provide information on healthcare-related topics. If you do not get relevant \
documents from the tool, politely inform the user that you could not find relevant information in \
your database.";

/// System prompt of the retrieval chains. `{context}` receives the stuffed documents.
pub const RETRIEVER_SYSTEM_PROMPT: &str = "You are very powerful assistant that can answer questions \
about diseases and also diagnose users based on their symptoms based on the provided context. Display \
the source link along with the content. {guidelines}\nCONTEXT: {context}";

pub const AGENT_SYSTEM_PROMPT: &str = "You are very powerful assistant with access to tools that can \
help you retrieve data from the vector database, answer questions about diseases and also diagnose \
users based on their symptoms. {guidelines}";

/// Question-answering prompt of the conversational chain.
pub const HEALTHCARE_QA_PROMPT: &str = "You are very powerful assistant that can answer questions \
about diseases and also diagnose users based on their symptoms based on the provided context. ALWAYS! \
display the source link along with the content. {guidelines}\nCONTEXT: {context}\nQuestion: \
{question}\nHelpful Answer:";

pub const CONDENSE_QUESTION_PROMPT: &str = "Given the following conversation and a follow up \
question, rephrase the follow up question to be a standalone question, in its original language.\n\n\
Chat History:\n{chat_history}\nFollow Up Input: {question}\nStandalone question:";

pub const SEARCH_QUERY_PROMPT: &str = "Given the above conversation, generate a search query to look \
up in order to get information relevant to the conversation";

/// Substitute `{name}` placeholders in one pass, so values that contain
/// braces are never expanded. `{guidelines}` is always available.
pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let Some(end) = after.find('}') else {
            out.push_str(&rest[start..]);
            return out;
        };

        let name = &after[..end];
        let value = if name == "guidelines" {
            Some(GUIDELINES)
        } else {
            vars.iter().find(|(n, _)| *n == name).map(|(_, v)| *v)
        };
        match value {
            Some(v) => {
                out.push_str(v);
                rest = &after[end + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }

    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_fills_placeholders() {
        let prompt = render(HEALTHCARE_QA_PROMPT, &[("context", "Flu is viral."), ("question", "What is flu?")]);
        assert!(prompt.contains("CONTEXT: Flu is viral.\nQuestion: What is flu?\nHelpful Answer:"));
        assert!(prompt.contains("healthcare assistant"));
        assert!(!prompt.contains('{'));
    }

    #[test]
    fn test_values_are_not_re_expanded() {
        let prompt = render("{context} / {question}", &[("context", "{question}"), ("question", "q")]);
        assert_eq!(prompt, "{question} / q");
        assert_eq!(render("json {\"a\": 1}", &[]), "json {\"a\": 1}");
    }

    #[test]
    fn test_agent_prompt_has_no_placeholders_left() {
        assert!(!render(AGENT_SYSTEM_PROMPT, &[]).contains('{'));
    }
}
