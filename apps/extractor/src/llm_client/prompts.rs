// Cross-cutting prompt fragments shared by every provider.
// Extraction-specific prompt assembly lives in extraction/prompts.rs.

/// System prompt fragment that enforces JSON-only output.
pub const JSON_ONLY_SYSTEM: &str = "\
IMPORTANTE:
- Debes responder EXCLUSIVAMENTE con JSON válido
- No incluyas explicaciones, comentarios ni texto adicional
- No uses bloques de código markdown
- El JSON debe cumplir exactamente con el esquema proporcionado
- Si un campo no puede deducirse con alta confianza, usa null, false o lista vacía []
- Para campos numéricos, usa números (no strings)
- Para campos booleanos, usa true o false (no strings)
- Para campos categorical, usa exactamente uno de los valores permitidos
- Sé preciso y conservador: mejor null/false que inventar información";

const DOCUMENT_OPEN: &str = "Texto del CV a analizar:\n---";
const DOCUMENT_CLOSE: &str = "---\n\nResponde SOLO con el JSON, sin explicaciones adicionales.";

/// Frames the (already truncated) document under the user prompt. Providers
/// send the result as the single user message.
pub fn compose_user_message(user_prompt: &str, document_text: &str) -> String {
    format!("{user_prompt}\n\n{DOCUMENT_OPEN}\n{document_text}\n{DOCUMENT_CLOSE}")
}
