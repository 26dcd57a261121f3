//! Schema compilation through the public API.

use serde_json::json;
use spec_gate::{
    compile, Dialect, ReferenceRegistry, Schema, SchemaValidator, SpecError,
    SpecificationBuilder, ValidationEnv, ValidatorOptions,
};

fn pet_and_owner() -> (spec_gate::SchemaRef, spec_gate::SchemaRef) {
    let owner = Schema::from(json!({
        "type": "object",
        "properties": { "email": { "type": "string" } }
    }))
    .shared();
    let pet = Schema::from(json!({ "type": "object", "required": ["name"] }))
        .with(
            "properties",
            Schema::object()
                .with("name", Schema::from(json!({ "type": "string" })))
                .with("owner", &owner),
        )
        .shared();
    (pet, owner)
}

#[test]
fn components_are_published_in_documentation_dialect() {
    let (pet, owner) = pet_and_owner();
    let spec = SpecificationBuilder::new("Pets", "1.0.0")
        .schema("Pet", &pet)
        .schema("Owner", &owner)
        .build()
        .unwrap();

    let schemas = &spec.document()["components"]["schemas"];
    assert_eq!(
        schemas["Pet"]["properties"]["owner"],
        json!({ "$ref": "#/components/schemas/Owner" })
    );
    assert_eq!(schemas["Owner"]["type"], "object");
}

#[test]
fn unregistered_link_reports_location() {
    let (pet, _owner) = pet_and_owner();
    let err = SpecificationBuilder::new("Pets", "1.0.0")
        .schema("Pet", &pet)
        .build()
        .unwrap_err();
    match err {
        SpecError::UnresolvedReference { path } => assert!(path.contains("owner"), "{}", path),
        other => panic!("unexpected error: {}", other),
    }
}

#[test]
fn structurally_equal_schemas_are_distinct_references() {
    let a = Schema::from(json!({ "type": "string" })).shared();
    let b = Schema::from(json!({ "type": "string" })).shared();
    let mut registry = ReferenceRegistry::new();
    registry.register("A", &a).unwrap();

    assert!(compile(&Schema::reference(&a), Dialect::Validation, &registry).is_ok());
    assert!(matches!(
        compile(&Schema::reference(&b), Dialect::Validation, &registry),
        Err(SpecError::UnresolvedReference { .. })
    ));
}

#[test]
fn duplicate_registration_is_rejected() {
    let (pet, owner) = pet_and_owner();
    let same_name = SpecificationBuilder::new("Pets", "1.0.0")
        .schema("Pet", &pet)
        .schema("Pet", &owner)
        .build();
    assert!(matches!(same_name, Err(SpecError::InvalidConfiguration { .. })));

    let same_object = SpecificationBuilder::new("Pets", "1.0.0")
        .schema("Owner", &owner)
        .schema("Person", &owner)
        .build();
    assert!(matches!(same_object, Err(SpecError::InvalidConfiguration { .. })));
}

#[test]
fn compilation_is_deterministic_and_leaves_source_untouched() {
    let check = Schema::validator(|_, _| None);
    let schema = Schema::from(json!({ "type": "string", "const": "x" })).with("x-validator", check);
    let before = schema.clone();
    let registry = ReferenceRegistry::new();

    let first = compile(&schema, Dialect::Validation, &registry).unwrap();
    let second = compile(&schema, Dialect::Validation, &registry).unwrap();
    assert_eq!(first.value, second.value);
    assert_eq!(first.functions.len(), 1);
    assert_eq!(schema, before);
}

#[test]
fn nested_vendor_keywords_are_lowered_everywhere() {
    let schema = Schema::from(json!({
        "type": "object",
        "properties": {
            "tags": {
                "type": "array",
                "items": { "x-nullable": { "type": "string" } }
            },
            "kind": { "const": "pet" }
        }
    }));
    let registry = ReferenceRegistry::new();

    let doc = compile(&schema, Dialect::Documentation, &registry).unwrap().value;
    let items = &doc["properties"]["tags"]["items"];
    assert_eq!(items["allOf"], json!([{ "type": "string" }]));
    assert_eq!(items["nullable"], true);
    assert_eq!(doc["properties"]["kind"], json!({ "enum": ["pet"] }));

    let val = compile(&schema, Dialect::Validation, &registry).unwrap().value;
    assert_eq!(
        val["properties"]["tags"]["items"],
        json!({ "anyOf": [{ "type": "string" }, { "type": "null" }] })
    );
    assert_eq!(val["properties"]["kind"], json!({ "const": "pet" }));
}

#[test]
fn literal_examples_keep_vendor_keys() {
    let schema = Schema::from(json!({
        "type": "object",
        "examples": [{ "x-nullable": true, "const": 1 }]
    }));
    let doc = compile(&schema, Dialect::Documentation, &ReferenceRegistry::new())
        .unwrap()
        .value;
    assert_eq!(doc["examples"], json!([{ "x-nullable": true, "const": 1 }]));
}

#[test]
fn specification_compile_uses_its_registry() {
    let (pet, owner) = pet_and_owner();
    let spec = SpecificationBuilder::new("Pets", "1.0.0")
        .schema("Pet", &pet)
        .schema("Owner", &owner)
        .build()
        .unwrap();

    let list = Schema::from(json!({ "type": "array" })).with("items", &pet);
    let val = spec.compile(&list, Dialect::Validation).unwrap();
    assert_eq!(val.value["items"]["$ref"], "#/$defs/Pet");
}

#[test]
fn names_are_pointer_escaped() {
    let odd = Schema::from(json!({ "type": "string" })).shared();
    let mut registry = ReferenceRegistry::new();
    registry.register("a/b~c", &odd).unwrap();

    let doc = compile(&Schema::reference(&odd), Dialect::Documentation, &registry).unwrap();
    assert_eq!(doc.value["$ref"], "#/components/schemas/a~1b~0c");
}

#[test]
fn nullable_schemas_accept_null_and_wrapped_values() {
    let registry = ReferenceRegistry::new();
    let wrapper = Schema::nullable(Schema::from(json!({ "type": "string", "minLength": 2 })));
    let compiled = compile(&wrapper, Dialect::Validation, &registry).unwrap();
    let validator =
        SchemaValidator::build(&compiled, &ValidationEnv::default(), &ValidatorOptions::default())
            .unwrap();

    assert!(validator.validate(&json!(null)).is_ok());
    assert!(validator.validate(&json!("ok")).is_ok());
    assert!(validator.validate(&json!("x")).is_err());
    assert!(validator.validate(&json!(5)).is_err());
}

#[test]
fn nullable_link_accepts_null_and_the_component() {
    let plain = Schema::from(json!({ "type": "object", "required": ["name"] })).shared();
    let mut registry = ReferenceRegistry::new();
    registry.register("Pet", &plain).unwrap();
    let mut env = ValidationEnv::default();
    env.add_definition(
        "Pet",
        compile(&plain, Dialect::Validation, &registry).unwrap(),
    );

    let maybe_pet = Schema::reference(&plain).with("x-nullable", true);
    let doc = compile(&maybe_pet, Dialect::Documentation, &registry).unwrap();
    assert_eq!(
        doc.value["allOf"],
        json!([{ "$ref": "#/components/schemas/Pet" }])
    );
    assert_eq!(doc.value["nullable"], true);

    let compiled = compile(&maybe_pet, Dialect::Validation, &registry).unwrap();
    let validator =
        SchemaValidator::build(&compiled, &env, &ValidatorOptions::default()).unwrap();
    assert!(validator.validate(&json!(null)).is_ok());
    assert!(validator.validate(&json!({ "name": "Rex" })).is_ok());
    assert!(validator.validate(&json!({})).is_err());
}
