//! Built-in schema used when a batch does not bring its own.
//!
//! The variable set is shared across specialties; only the name of the
//! experience-confirmation field changes (`experiencia_electricista_confirmada`, ...).

use crate::extraction::prompts::{PromptConfig, Specialty};
use crate::schema::model::{Schema, SchemaError};

/// Renders the default schema YAML around the given experience field name.
pub fn default_schema_yaml(experience_field: &str) -> String {
    DEFAULT_SCHEMA_TEMPLATE.replace("{experience_field}", experience_field)
}

/// Default schema for a built-in specialty.
pub fn default_schema(specialty: Specialty) -> Result<Schema, SchemaError> {
    Schema::parse(&default_schema_yaml(specialty.template().experience_field.as_str()))
}

/// Default schema for a prompt configuration, honouring a custom experience field.
pub fn default_schema_for(config: &PromptConfig) -> Result<Schema, SchemaError> {
    Schema::parse(&default_schema_yaml(&config.template().experience_field))
}

const DEFAULT_SCHEMA_TEMPLATE: &str = r#"version: 1
variables:
  # Contacto
  - name: nombre
    type: string
    required: false
  - name: mail
    type: string
    format: email
    required: false
  - name: telefono
    type: string
    required: false

  - name: hay_foto_en_cv
    type: boolean
    required: false

  # Educación
  - name: primaria_completa
    type: boolean
    required: true
  - name: secundaria_completa
    type: boolean
    required: true
  - name: secundaria_tecnica
    type: boolean
    required: false
    description: Indica si el secundario cursado fue una escuela técnica
  - name: titulo_secundario
    type: string
    required: false
    description: Título obtenido en el secundario (ej. "Técnico Electromecánico", "Bachiller")
  - name: terciario_completo
    type: boolean
    required: false

  # Experiencia
  - name: {experience_field}
    type: boolean
    required: true
  - name: años_experiencia
    type: integer
    min: 0
    max: 50
    required: false

  # Ubicación y edad
  - name: edad
    type: integer
    min: 18
    max: 80
    required: false
    description: Edad del candidato en años
  - name: localidad_residencia
    type: string
    required: false
    description: Localidad o ciudad donde reside el candidato
  - name: lugar_residencia_proximo
    type: boolean
    required: false
    description: Indica si reside cerca de la ubicación objetivo
  - name: edad_en_rango
    type: boolean
    required: false
    description: Indica si la edad está en el rango deseado

  # Evaluación
  - name: score_general
    type: integer
    min: 1
    max: 10
    required: true
    description: Puntaje general del candidato del 1 al 10 según experiencia, educación y adecuación al perfil
  - name: observaciones
    type: string
    required: false
    description: Resumen del perfil en máximo 3 oraciones con aspectos no capturados en otros campos

  - name: idiomas
    type: list[object]
    properties:
      idioma: string
      nivel: string
    required: false
  - name: otros_oficios_tecnicos
    type: list[string]
    required: false
    description: Otros conocimientos técnicos u oficios que posee el candidato
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extraction::prompts::TemplateOverrides;
    use crate::schema::model::VariableType;

    #[test]
    fn test_every_specialty_default_parses() {
        for specialty in Specialty::ALL {
            let schema = default_schema(specialty).unwrap();
            assert_eq!(schema.variables.len(), 19, "{specialty:?}");
            let field = specialty.template().experience_field;
            assert!(schema.variable(&field).unwrap().required);
        }
    }

    #[test]
    fn test_electricista_defaults() {
        let schema = default_schema(Specialty::Electricista).unwrap();
        let required: Vec<_> = schema.required_names().collect();

        assert_eq!(
            required,
            vec![
                "primaria_completa",
                "secundaria_completa",
                "experiencia_electricista_confirmada",
                "score_general"
            ]
        );
        let exp = schema.variable("años_experiencia").unwrap();
        assert_eq!((exp.min, exp.max), (Some(0.0), Some(50.0)));
        assert!(matches!(
            schema.variable("idiomas").unwrap().var_type,
            VariableType::ListOfObject { .. }
        ));
    }

    #[test]
    fn test_custom_experience_field() {
        let config = PromptConfig {
            specialty: Specialty::Personalizado,
            custom_fields: Some(TemplateOverrides {
                experience_field: Some("experiencia_soldador_confirmada".into()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let schema = default_schema_for(&config).unwrap();
        assert!(schema.variable("experiencia_soldador_confirmada").is_some());
    }
}
