//! Prompt Builder: schema + configuration → deterministic (system, user) prompt pair.
//!
//! `build` is a pure function of its inputs: no clocks, no randomness, no
//! hash-map iteration. The document itself is not part of the pair; it is
//! truncated here and framed by the provider (`llm_client::prompts`).

use serde::{Deserialize, Serialize};

use crate::extraction::validator::ValidationError;
use crate::llm_client::prompts::JSON_ONLY_SYSTEM;
use crate::schema::model::format_bound;
use crate::schema::{Property, PropertyType, Schema, SchemaVariable, StringFormat, VariableType};

/// Documents longer than this many characters are cut (prefix, char boundary).
pub const MAX_DOCUMENT_CHARS: usize = 10_000;
/// How much of a rejected response is echoed back in a repair prompt.
pub const REPAIR_EXCERPT_CHARS: usize = 500;
pub const DEFAULT_RADIUS_KM: u32 = 10;

pub const DEFAULT_SCORING_CRITERIA: &str = "\
Educación relevante (hasta 2 puntos):
• +1 si culminó el secundario
• +1 si el secundario es técnico

Experiencia (hasta 4 puntos):
• +1 si tiene más de 2 años
• +1 si tiene más de 3 años
• +1 si trabajó en fábricas industriales y rubros afines
• +1 si tuvo responsabilidades específicas o lideró tareas

Claridad y presentación del CV (hasta 1 punto):
• 1 punto si está bien organizado, con fechas y descripciones claras

Conocimientos técnicos (hasta 2 puntos):
• Presencia de conocimientos relevantes para la posición

Ubicación geográfica (hasta 1 punto):
• +1 si reside en la zona objetivo o radio cercano

Penalizaciones:
• -2 puntos si el candidato tiene 2 o más oficios NO relacionados a la posición";

const SYSTEM_PREAMBLE: &str = "\
Sos un analista de recursos humanos especializado en perfiles técnicos.
Tu tarea es analizar el contenido de UN SOLO CV y devolver un JSON con información estructurada del candidato.";

const SYSTEM_CLOSING: &str = "- Si un campo no se menciona explícitamente, asumí que es falso o null";

// ────────────────────────────────────────────────────────────────────────────
// Specialties
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Specialty {
    Electricista,
    Electromecanico,
    Mecanico,
    #[serde(rename = "pañolero", alias = "panolero")]
    Panolero,
    #[default]
    Personalizado,
}

impl Specialty {
    pub const ALL: [Specialty; 5] = [
        Specialty::Electricista,
        Specialty::Electromecanico,
        Specialty::Mecanico,
        Specialty::Panolero,
        Specialty::Personalizado,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Specialty::Electricista => "electricista",
            Specialty::Electromecanico => "electromecanico",
            Specialty::Mecanico => "mecanico",
            Specialty::Panolero => "pañolero",
            Specialty::Personalizado => "personalizado",
        }
    }

    pub fn template(&self) -> SpecialtyTemplate {
        let (title, field, description, exclusions, age, skills, industries) = match self {
            Specialty::Electricista => (
                "Electricista de Mantenimiento Industrial",
                "experiencia_electricista_confirmada",
                "trabajo previo con tareas de mantenimiento eléctrico, electricidad industrial, electrónica industrial",
                "electricidad de obra de construcción",
                "25-45",
                "PLC, electricidad industrial, neumática, electrónica",
                "fábricas industriales y rubros afines alimenticio",
            ),
            Specialty::Electromecanico => (
                "Electromecánico de Mantenimiento Industrial",
                "experiencia_electromecanico_confirmada",
                "trabajo previo con tareas de mantenimiento electromecánico industrial",
                "electricidad de obra de construcción",
                "25-45",
                "PLC, electricidad industrial, neumática, electromecánica",
                "fábricas industriales y rubros afines alimenticio",
            ),
            Specialty::Mecanico => (
                "Mecánico Industrial",
                "experiencia_mecanico_industrial_confirmada",
                "trabajo previo con tareas de mantenimiento mecánico, soldador industrial",
                "mecánico de obra de construcción",
                "25-45",
                "soldadura de caños pequeñas medidas, soldaduras piping",
                "fábricas industriales",
            ),
            Specialty::Panolero => (
                "Pañolero Industrial",
                "experiencia_pañol_depositos_confirmada",
                "trabajo previo con tareas de pañol industrial, depósitos",
                "",
                "25-50",
                "PLC, electricidad industrial, neumática, electrónica, hidráulica",
                "fábricas industriales y rubros afines alimenticio",
            ),
            Specialty::Personalizado => ("", "experiencia_confirmada", "", "", "25-45", "", ""),
        };

        SpecialtyTemplate {
            title: title.to_string(),
            experience_field: field.to_string(),
            experience_description: description.to_string(),
            exclusions: exclusions.to_string(),
            age_range: age.to_string(),
            relevant_skills: skills.to_string(),
            relevant_industries: industries.to_string(),
        }
    }
}

/// Position profile the prompt is written around.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecialtyTemplate {
    pub title: String,
    pub experience_field: String,
    pub experience_description: String,
    pub exclusions: String,
    /// `"25-45"`; anything not shaped `min-max` skips the age-range definition.
    pub age_range: String,
    pub relevant_skills: String,
    pub relevant_industries: String,
}

/// Overrides applied on top of the `personalizado` template.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TemplateOverrides {
    #[serde(alias = "titulo")]
    pub title: Option<String>,
    #[serde(alias = "experiencia_campo")]
    pub experience_field: Option<String>,
    #[serde(alias = "descripcion_experiencia")]
    pub experience_description: Option<String>,
    #[serde(alias = "exclusiones")]
    pub exclusions: Option<String>,
    #[serde(alias = "rango_edad")]
    pub age_range: Option<String>,
    #[serde(alias = "conocimientos_relevantes")]
    pub relevant_skills: Option<String>,
    #[serde(alias = "industrias_relevantes")]
    pub relevant_industries: Option<String>,
}

impl TemplateOverrides {
    fn apply(&self, template: &mut SpecialtyTemplate) {
        let slots = [
            (&self.title, &mut template.title),
            (&self.experience_field, &mut template.experience_field),
            (&self.experience_description, &mut template.experience_description),
            (&self.exclusions, &mut template.exclusions),
            (&self.age_range, &mut template.age_range),
            (&self.relevant_skills, &mut template.relevant_skills),
            (&self.relevant_industries, &mut template.relevant_industries),
        ];
        for (value, slot) in slots {
            if let Some(value) = value {
                *slot = value.clone();
            }
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Configuration
// ────────────────────────────────────────────────────────────────────────────

/// Immutable per batch; consumed only by the prompt builder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptConfig {
    pub specialty: Specialty,
    /// Free-text location of the position (empty: no location lines).
    pub location: String,
    pub radius_km: u32,
    /// `None` uses `DEFAULT_SCORING_CRITERIA`; an empty string disables the section.
    pub scoring_criteria: Option<String>,
    /// Only honoured for `personalizado`.
    pub custom_fields: Option<TemplateOverrides>,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            specialty: Specialty::default(),
            location: String::new(),
            radius_km: DEFAULT_RADIUS_KM,
            scoring_criteria: None,
            custom_fields: None,
        }
    }
}

impl PromptConfig {
    pub fn for_specialty(specialty: Specialty) -> Self {
        Self {
            specialty,
            ..Default::default()
        }
    }

    /// The specialty template with custom overrides applied.
    pub fn template(&self) -> SpecialtyTemplate {
        let mut template = self.specialty.template();
        if self.specialty == Specialty::Personalizado {
            if let Some(overrides) = &self.custom_fields {
                overrides.apply(&mut template);
            }
        }
        template
    }

    pub fn scoring_criteria(&self) -> &str {
        self.scoring_criteria
            .as_deref()
            .unwrap_or(DEFAULT_SCORING_CRITERIA)
            .trim()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Builder
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptPair {
    pub system: String,
    pub user: String,
}

pub fn build(schema: &Schema, config: &PromptConfig) -> PromptPair {
    let system = format!("{SYSTEM_PREAMBLE}\n\n{JSON_ONLY_SYSTEM}\n{SYSTEM_CLOSING}");

    let template = config.template();
    let mut sections = vec![
        header(&template, config),
        schema_section(schema),
    ];

    let definitions = field_definitions(schema, &template, config);
    if !definitions.is_empty() {
        sections.push(format!(
            "Definiciones para campos específicos:\n{}",
            definitions.join("\n")
        ));
    }

    let criteria = config.scoring_criteria();
    if !criteria.is_empty() {
        let target = schema
            .variables
            .iter()
            .find(|v| v.name == "score_general")
            .map(|v| format!("{}: ", v.name))
            .unwrap_or_default();
        sections.push(format!(
            "{target}Criterios de puntaje:\n\n{criteria}\n\nIMPORTANTE: Evalúa cuidadosamente cada criterio y asigna puntos justificados."
        ));
    }

    sections.push(instructions(schema));

    PromptPair {
        system,
        user: sections.join("\n\n"),
    }
}

fn header(template: &SpecialtyTemplate, config: &PromptConfig) -> String {
    let title = if template.title.is_empty() {
        "Perfil Técnico"
    } else {
        template.title.as_str()
    };
    let mut header = format!("Vas a analizar un CV para una posición de: {title}");

    if !config.location.trim().is_empty() {
        header.push_str(&format!(
            "\nUbicación de la posición: {}\nRadio aceptable: {} km",
            config.location.trim(),
            config.radius_km
        ));
    }
    if !template.relevant_skills.is_empty() {
        header.push_str(&format!("\nConocimientos relevantes: {}", template.relevant_skills));
    }
    if !template.relevant_industries.is_empty() {
        header.push_str(&format!("\nIndustrias relevantes: {}", template.relevant_industries));
    }
    header
}

fn schema_section(schema: &Schema) -> String {
    let mut lines = vec!["Esquema JSON requerido:".to_string(), "{".to_string()];
    for variable in &schema.variables {
        lines.push(describe_variable(variable));
    }
    lines.push("}".to_string());
    lines.join("\n")
}

fn describe_variable(variable: &SchemaVariable) -> String {
    let mut line = format!("  \"{}\": {}", variable.name, describe_type(&variable.var_type));

    let mut bounds = Vec::new();
    if let Some(min) = variable.min {
        bounds.push(format!("min={}", format_bound(min)));
    }
    if let Some(max) = variable.max {
        bounds.push(format!("max={}", format_bound(max)));
    }
    if !bounds.is_empty() {
        line.push_str(&format!(" ({})", bounds.join(", ")));
    }

    line.push_str(if variable.required {
        " [REQUERIDO]"
    } else {
        " [opcional, puede ser null]"
    });

    if let Some(description) = &variable.description {
        line.push_str(&format!(" - {description}"));
    }
    line
}

fn describe_type(var_type: &VariableType) -> String {
    match var_type {
        VariableType::String { format: None } => "\"string\"".to_string(),
        VariableType::String {
            format: Some(StringFormat::Email),
        } => "\"string\" (email)".to_string(),
        VariableType::Integer => "number (entero)".to_string(),
        VariableType::Float => "number (decimal)".to_string(),
        VariableType::Boolean => "true o false".to_string(),
        VariableType::Categorical { allowed_values } => {
            format!("uno de: [{}]", quoted_list(allowed_values))
        }
        VariableType::ListOfString => "[\"string\", ...]".to_string(),
        VariableType::ListOfInteger => "[number (entero), ...]".to_string(),
        VariableType::ListOfObject { properties } => {
            format!("[{}, ...]", describe_properties(properties))
        }
        VariableType::Object { properties } if properties.is_empty() => "{...}".to_string(),
        VariableType::Object { properties } => describe_properties(properties),
    }
}

fn describe_properties(properties: &[Property]) -> String {
    let fields: Vec<String> = properties
        .iter()
        .map(|p| {
            let kind = match &p.kind {
                PropertyType::Scalar(scalar) => scalar.tag().to_string(),
                PropertyType::Enum(allowed) => format!("uno de: [{}]", quoted_list(allowed)),
            };
            format!("\"{}\": {kind}", p.name)
        })
        .collect();
    format!("{{{}}}", fields.join(", "))
}

fn quoted_list(values: &[String]) -> String {
    values
        .iter()
        .map(|v| format!("\"{v}\""))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Definitions for well-known fields, emitted only for fields the schema declares.
fn field_definitions(
    schema: &Schema,
    template: &SpecialtyTemplate,
    config: &PromptConfig,
) -> Vec<String> {
    let has = |name: &str| schema.variable(name).is_some();
    let mut definitions = Vec::new();

    if has("primaria_completa") {
        definitions.push("• primaria_completa: true si se menciona finalización de estudios primarios".to_string());
    }
    if has("secundaria_completa") {
        definitions.push("• secundaria_completa: true si terminó la secundaria (aclarar si es escuela técnica)".to_string());
    }
    if has("terciario_completo") {
        definitions.push("• terciario_completo: true si cursó y finalizó una tecnicatura relacionada".to_string());
    }
    if has(&template.experience_field) {
        let description = if template.experience_description.is_empty() {
            "experiencia laboral relevante para la posición"
        } else {
            template.experience_description.as_str()
        };
        let mut line = format!(
            "• {}: true si se menciona {description} y se puede corroborar con fechas o descripciones",
            template.experience_field
        );
        if !template.exclusions.is_empty() {
            line.push_str(&format!("\n  false si menciona {}", template.exclusions));
        }
        definitions.push(line);
    }
    if has("edad_en_rango") {
        if let Some((low, high)) = template.age_range.split_once('-') {
            definitions.push(format!(
                "• edad_en_rango: true si edad está entre {} y {} años, false en otro caso",
                low.trim(),
                high.trim()
            ));
        }
    }
    if has("lugar_residencia_proximo") && !config.location.trim().is_empty() {
        definitions.push(format!(
            "• lugar_residencia_proximo: true si reside en un radio menor o igual a {}km de {}",
            config.radius_km,
            config.location.trim()
        ));
    }
    if has("hay_foto_en_cv") {
        definitions.push("• hay_foto_en_cv: true si el CV incluye una foto del candidato (ver nota de imágenes, si existe)".to_string());
    }
    definitions
}

fn instructions(schema: &Schema) -> String {
    let mut lines = vec![
        "Instrucciones adicionales:".to_string(),
        "• Devolvé un único objeto JSON cuyas claves sean exactamente los campos del esquema".to_string(),
    ];
    if schema.variable("años_experiencia").is_some() {
        lines.push("• Para 'años_experiencia': suma todos los años de experiencia laboral relevante".to_string());
    }
    if schema.variable("observaciones").is_some() {
        lines.push("• Para 'observaciones': resumen del perfil en MÁXIMO 3 oraciones con aspectos no capturados en otros campos".to_string());
    }
    lines.push("• Si no encuentras información para un campo, usa null, false o [] (no inventes)".to_string());
    lines.join("\n")
}

// ────────────────────────────────────────────────────────────────────────────
// Document embedding and repair
// ────────────────────────────────────────────────────────────────────────────

/// Prefix of at most `MAX_DOCUMENT_CHARS` characters. May cut mid-word.
pub fn truncate_document(text: &str) -> &str {
    truncate_chars(text, MAX_DOCUMENT_CHARS)
}

fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => &text[..byte_index],
        None => text,
    }
}

/// User prompt for a repair attempt: the original prompt plus the rejected
/// output and the error it produced.
pub fn repair_prompt(base_user: &str, previous_output: &str, error: &ValidationError) -> String {
    let excerpt = truncate_chars(previous_output.trim(), REPAIR_EXCERPT_CHARS);
    format!(
        "{base_user}\n\n\
         CORRECCIÓN REQUERIDA: tu respuesta anterior no pasó la validación.\n\
         Error: {error}\n\
         Respuesta anterior (primeros {REPAIR_EXCERPT_CHARS} caracteres):\n{excerpt}\n\n\
         Devolvé nuevamente el objeto JSON completo corrigiendo el error."
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extraction::validator::ValidationErrorKind;
    use crate::schema::defaults::default_schema;

    fn sample_schema() -> Schema {
        Schema::parse(
            r#"
version: 1
variables:
  - name: nombre
    type: string
    required: true
  - name: años_experiencia
    type: integer
    min: 0
    max: 50
  - name: nivel
    type: categorical
    allowed_values: [junior, senior]
    description: Seniority declarado
  - name: idiomas
    type: list_of_object
    properties:
      idioma: string
      nivel: [basico, avanzado]
"#,
        )
        .unwrap()
    }

    #[test]
    fn test_build_is_deterministic() {
        let schema = default_schema(Specialty::Electricista).unwrap();
        let config = PromptConfig {
            specialty: Specialty::Electricista,
            location: "Lanús".into(),
            ..Default::default()
        };
        assert_eq!(build(&schema, &config), build(&schema, &config));
        assert_eq!(
            build(&schema, &config),
            build(&schema.clone(), &config.clone())
        );
    }

    #[test]
    fn test_user_prompt_enumerates_every_variable() {
        let prompt = build(&sample_schema(), &PromptConfig::default());

        assert!(prompt.user.contains("\"nombre\": \"string\" [REQUERIDO]"));
        assert!(prompt
            .user
            .contains("\"años_experiencia\": number (entero) (min=0, max=50) [opcional, puede ser null]"));
        assert!(prompt
            .user
            .contains("\"nivel\": uno de: [\"junior\", \"senior\"] [opcional, puede ser null] - Seniority declarado"));
        assert!(prompt
            .user
            .contains("[{\"idioma\": string, \"nivel\": uno de: [\"basico\", \"avanzado\"]}, ...]"));
        assert!(prompt.system.contains("EXCLUSIVAMENTE con JSON"));
    }

    #[test]
    fn test_scoring_criteria_embedded_verbatim() {
        let custom = "• +5 si sabe soldar\n• -1 si no tiene fechas";
        let config = PromptConfig {
            scoring_criteria: Some(custom.to_string()),
            ..Default::default()
        };
        let prompt = build(&sample_schema(), &config);
        assert!(prompt.user.contains(custom));

        let default_prompt = build(&sample_schema(), &PromptConfig::default());
        assert!(default_prompt.user.contains(DEFAULT_SCORING_CRITERIA));

        let disabled = PromptConfig {
            scoring_criteria: Some(String::new()),
            ..Default::default()
        };
        assert!(!build(&sample_schema(), &disabled).user.contains("Criterios de puntaje"));
    }

    #[test]
    fn test_location_lines_only_when_location_set() {
        let schema = default_schema(Specialty::Mecanico).unwrap();
        let without = build(&schema, &PromptConfig::for_specialty(Specialty::Mecanico));
        assert!(!without.user.contains("Radio aceptable"));
        assert!(!without.user.contains("lugar_residencia_proximo: true si"));

        let with = build(
            &schema,
            &PromptConfig {
                specialty: Specialty::Mecanico,
                location: "Pilar".into(),
                radius_km: 25,
                ..Default::default()
            },
        );
        assert!(with.user.contains("Ubicación de la posición: Pilar\nRadio aceptable: 25 km"));
        assert!(with.user.contains("radio menor o igual a 25km de Pilar"));
        assert!(with.user.contains("Mecánico Industrial"));
    }

    #[test]
    fn test_definitions_follow_schema_fields() {
        let schema = default_schema(Specialty::Electricista).unwrap();
        let prompt = build(&schema, &PromptConfig::for_specialty(Specialty::Electricista));
        assert!(prompt
            .user
            .contains("• experiencia_electricista_confirmada: true si se menciona trabajo previo"));
        assert!(prompt.user.contains("false si menciona electricidad de obra de construcción"));
        assert!(prompt.user.contains("entre 25 y 45 años"));

        let minimal = build(&sample_schema(), &PromptConfig::for_specialty(Specialty::Electricista));
        assert!(!minimal.user.contains("Definiciones para campos específicos"));
    }

    #[test]
    fn test_custom_overrides_only_apply_to_personalizado() {
        let overrides = TemplateOverrides {
            title: Some("Soldador".into()),
            ..Default::default()
        };
        let custom = PromptConfig {
            custom_fields: Some(overrides.clone()),
            ..Default::default()
        };
        assert_eq!(custom.template().title, "Soldador");

        let ignored = PromptConfig {
            specialty: Specialty::Mecanico,
            custom_fields: Some(overrides),
            ..Default::default()
        };
        assert_eq!(ignored.template().title, "Mecánico Industrial");
    }

    #[test]
    fn test_prompt_config_deserializes_with_spanish_override_keys() {
        let config: PromptConfig = serde_json::from_str(
            r#"{"specialty":"pañolero","custom_fields":{"titulo":"X","rango_edad":"30-40"}}"#,
        )
        .unwrap();
        assert_eq!(config.specialty, Specialty::Panolero);
        assert_eq!(config.radius_km, DEFAULT_RADIUS_KM);
        assert_eq!(
            config.custom_fields.unwrap().age_range.as_deref(),
            Some("30-40")
        );
    }

    #[test]
    fn test_truncate_document_cuts_on_char_boundary() {
        let long = "ñ".repeat(MAX_DOCUMENT_CHARS + 10);
        let cut = truncate_document(&long);
        assert_eq!(cut.chars().count(), MAX_DOCUMENT_CHARS);
        assert_eq!(truncate_document("corto"), "corto");
    }

    #[test]
    fn test_repair_prompt_embeds_error_and_excerpt() {
        let error = ValidationError::missing_field("secundaria_completa");
        let previous = format!("{{\"nombre\": \"{}\"", "x".repeat(900));
        let prompt = repair_prompt("BASE", &previous, &error);

        assert!(prompt.starts_with("BASE\n\nCORRECCIÓN REQUERIDA"));
        assert!(prompt.contains("secundaria_completa"));
        assert!(prompt.contains(&previous[..REPAIR_EXCERPT_CHARS]));
        assert!(!prompt.contains(&previous[..REPAIR_EXCERPT_CHARS + 1]));
        assert_eq!(error.kind, ValidationErrorKind::MissingField);
    }
}
