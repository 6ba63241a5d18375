use std::str::FromStr;

use crate::models::ConversationTurn;

pub const BASELINE_SYSTEM_PROMPT: &str = "Eres Zoltar, un oráculo claro y útil.
- Responde SIEMPRE en español.
- Sé breve y directo (máx. 6-8 oraciones).
- Si no tienes datos suficientes, dilo con franqueza y sugiere qué información falta.
- Evita alucinaciones: no inventes cifras, nombres propios o referencias dudosas.
- Si el usuario pide pasos, entrégalos en una lista corta y accionable.
";

pub const ENGINEERED_SYSTEM_PROMPT: &str = "Eres Zoltar, un oráculo experto, riguroso y encantador.
Reglas:
1) Responde SIEMPRE en español.
2) Prioriza utilidad práctica: responde con pasos accionables y claros.
3) Evita alucinaciones. Si el contexto no aporta evidencia, dilo y sugiere cómo conseguirla.
4) Sé conciso (120–180 palabras). Si el usuario pide detalle, puedes extenderte.
5) Si hay ambigüedad, enumera 2–3 clarificadores que permitirían una mejor respuesta.
6) Usa tono respetuoso y motivador, sin excesos de adorno.
";

const GROUNDING_RULES: &str = "Usa solamente la información proporcionada en el contexto.
No inventes datos que no aparezcan en los documentos.
Cuando cites, menciona el título y la página del fragmento.
Si el contexto no basta para responder, dilo con honestidad.";

/// Prepended to the question when the model is called without documents.
pub const NO_DOCUMENTS_NOTICE: &str = "[Aviso del sistema: no se encontraron documentos relevantes \
en el índice para esta consulta. Responde con honestidad indicando esta limitación y sugiere \
cómo reformular la pregunta.]";

/// Tone presets of the simple persona.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Tone {
    Baseline,
    #[default]
    Engineered,
}

impl Tone {
    pub fn system_prompt(self) -> &'static str {
        match self {
            Tone::Baseline => BASELINE_SYSTEM_PROMPT,
            Tone::Engineered => ENGINEERED_SYSTEM_PROMPT,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Tone::Baseline => "baseline",
            Tone::Engineered => "engineered",
        }
    }

    /// Anything other than `baseline` selects the engineered preset.
    pub fn from_mode(mode: Option<&str>) -> Self {
        mode.and_then(|m| m.parse().ok()).unwrap_or_default()
    }
}

impl FromStr for Tone {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "baseline" => Ok(Tone::Baseline),
            "engineered" => Ok(Tone::Engineered),
            _ => Err(()),
        }
    }
}

pub fn simple_messages(tone: Tone, question: &str) -> Vec<ConversationTurn> {
    vec![
        ConversationTurn::system(tone.system_prompt()),
        ConversationTurn::user(question),
    ]
}

pub fn grounded_messages(system_prompt: &str, context: &str, question: &str) -> Vec<ConversationTurn> {
    let system = format!("{}\n\n{GROUNDING_RULES}", system_prompt.trim_end());
    let user = format!(
        "Contexto recuperado:\n{}\n\nPregunta:\n{}",
        context.trim(),
        question.trim()
    );

    vec![ConversationTurn::system(system), ConversationTurn::user(user)]
}

pub fn with_no_documents_notice(question: &str) -> String {
    format!("{NO_DOCUMENTS_NOTICE}\n\n{}", question.trim())
}

pub fn build_teacher_prompt(context: &str, question: &str, history: &str) -> String {
    let history = history.trim();
    let history_block = if history.is_empty() {
        String::new()
    } else {
        format!("\n\n[Historial breve]\n{history}")
    };

    format!(
        "Eres un maestro experto en educación y judaísmo.
Responde de forma clara, pedagógica y aplicada al aula, usando SOLO el contexto proporcionado.
No repitas ni listes el contexto; intégralo en tu explicación como si dieras clase.
Si falta información, dilo con honestidad y sugiere cómo podría investigarse.

Pregunta del estudiante:
{question}

Contexto recuperado (fragmentos con metadatos):
{context}

Instrucciones:
- Explica con ejemplos prácticos y situaciones de aula.
- Usa tono cercano, claro y motivador.
- No inventes datos fuera del contexto.
- Cuando sea útil, haz referencia explícita a metadatos como Documento ID, Título o Autores.
{history_block}
",
        question = question.trim(),
        context = context.trim(),
    )
}
