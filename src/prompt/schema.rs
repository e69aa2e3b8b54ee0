//! Classification Schemas
//!
//! JSON function-call schemas generated from the service catalog. The model
//! is constrained to the catalog's category and request-type names through
//! `enum` fields, and to the fixed impact/urgency/priority matrix.

use indoc::indoc;
use serde_json::{json, Value};
use strum::IntoEnumIterator;

use crate::app_config::ServiceCatalog;
use crate::prompt::PriorityLevel;

pub fn category_schema(catalog: &ServiceCatalog) -> Value {
    let mut description = String::from("Available categories and their purposes:\n");
    for category in &catalog.categories {
        description.push_str(&format!("\n• {}:\n", category.name));
        for request_type in &category.request_types {
            description.push_str(&format!(
                "  - {}: {}\n",
                request_type.name, request_type.description
            ));
        }
    }

    json!({
        "type": "object",
        "properties": {
            "category": {
                "type": "string",
                "enum": catalog.category_names(),
                "description": description,
            }
        },
        "required": ["category"],
        "additionalProperties": false,
    })
}

pub fn request_type_schema(catalog: &ServiceCatalog, category: &str) -> Value {
    let mut names: Vec<String> = Vec::new();
    let mut description = String::from("Available request types for this category:\n");
    if let Some(category) = catalog.category(category) {
        for request_type in &category.request_types {
            names.push(request_type.name.clone());
            description.push_str(&format!(
                "\n• {}: {}",
                request_type.name, request_type.description
            ));
        }
    }

    json!({
        "type": "object",
        "properties": {
            "request_type": {
                "type": "string",
                "enum": names,
                "description": description,
            }
        },
        "required": ["request_type"],
        "additionalProperties": false,
    })
}

pub fn priority_schema() -> Value {
    let matrix = indoc! {r#"
        Priority Matrix (Impact vs Urgency):
        - P1: High Impact + High Urgency
        - P2: (High Impact + Medium Urgency) or (Medium Impact + High Urgency)
        - P3: (High Impact + Low Urgency) or (Medium Impact + Medium Urgency) or (Low Impact + High Urgency)
        - P4: (Medium Impact + Low Urgency) or (Low Impact + Medium/Low Urgency)

        Impact Levels (based on scope of effect):
        - High: Entire location/dept (251+ employees), 10,001+ customers, safety issues, or company reputation
        - Medium: 101-250 employees, 1,001-10,000 customers, or business unit impact
        - Low: Up to 100 employees or 1,000 customers

        Urgency Levels (based on resolution timing):
        - High: Complete service outage, safety risk, data breach, strict deadline (<5 days), no workaround
        - Medium: Severe impact with temporary workaround, leadership impact, upcoming deadline (>5 days)
        - Low: Limited impact with readily available workaround, no critical timeline"#};

    let levels: Vec<String> = PriorityLevel::iter().map(|p| p.to_string()).collect();

    json!({
        "type": "object",
        "properties": {
            "impact": {
                "type": "string",
                "enum": ["High", "Medium", "Low"],
                "description": "Assess the scope and severity of the issue's effect",
            },
            "urgency": {
                "type": "string",
                "enum": ["High", "Medium", "Low"],
                "description": "Assess how quickly the issue needs resolution",
            },
            "priority": {
                "type": "string",
                "enum": levels,
                "description": "Final priority based on impact and urgency matrix",
            }
        },
        "required": ["impact", "urgency", "priority"],
        "description": matrix,
    })
}
