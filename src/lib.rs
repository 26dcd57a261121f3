//! spec-gate
//!
//! Schema-first API contracts: author schemas once, publish them as an
//! OpenAPI 3.0 document, and enforce them at runtime on every call.
//!
//! Schemas are authored as [`Schema`] trees. Named schemas are registered on
//! a [`SpecificationBuilder`] and linked by identity ([`Schema::reference`]).
//! Every schema is compiled into two dialects: the documentation dialect
//! (OpenAPI 3.0, `#/components/schemas/...` pointers) and the validation
//! dialect (JSON Schema 2020-12, `#/$defs/...` pointers, custom validators).
//!
//! # Example
//!
//! ```
//! use spec_gate::{Dialect, Schema, SpecificationBuilder};
//! use serde_json::json;
//!
//! let pet = Schema::from(json!({
//!     "type": "object",
//!     "properties": { "name": { "type": "string" } },
//!     "required": ["name"]
//! }))
//! .shared();
//!
//! let spec = SpecificationBuilder::new("Pets", "1.0.0")
//!     .schema("Pet", &pet)
//!     .build()
//!     .unwrap();
//!
//! let list = Schema::from(json!({ "type": "array" })).with("items", &pet);
//! let doc = spec.compile(&list, Dialect::Documentation).unwrap();
//! assert_eq!(doc.value["items"]["$ref"], "#/components/schemas/Pet");
//!
//! let val = spec.compile(&list, Dialect::Validation).unwrap();
//! assert_eq!(val.value["items"]["$ref"], "#/$defs/Pet");
//! ```
//!
//! # Vendor keywords
//!
//! | Keyword | Documentation | Validation |
//! |---------|---------------|------------|
//! | `x-nullable` | `allOf` + `nullable: true` | `anyOf` with `{"type": "null"}` |
//! | `x-validator` | stripped | custom functions run by the validator |
//! | `patternProperties` | flattened into `properties` | kept |
//! | `dependencies` | stripped | `dependentRequired` / `dependentSchemas` |
//! | `const` | `enum: [value]` | kept |

mod compiler;
mod endpoint;
mod error;
mod keyword;
mod loader;
mod params;
mod pipeline;
mod registry;
mod router;
mod schema;
mod spec;
mod types;
mod validator;

pub use compiler::{compile, compile_pair, CompiledPair, CompiledSchema, FunctionTable};
pub use endpoint::{
    Endpoint, EndpointBuilder, Handler, Parameter, RequestBody, ResponseSpec, SecurityRequirement,
};
pub use error::{CallError, JsonValidationError, ParameterTypeError, SchemaError, SpecError};
pub use keyword::{
    check_references, AsyncCallback, AsyncValidator, CheckContext, CustomValidation,
    NamedValidators, ValidatorCallback, ValidatorFn,
};
pub use loader::{
    is_url, load_document, load_document_auto, load_document_str, load_named_schemas,
    navigate_fragment,
};
pub use params::{convert, ConversionError};
pub use pipeline::{
    CallContext, CallSummary, ErrorSink, IncomingRequest, MemoryWriter, Reply, Response,
    ResponseWriter, TracingSink,
};
pub use registry::{parse_token, token, ReferenceRegistry};
pub use router::{to_transport_path, Route, RouteRegistrar, RouteTable};
pub use schema::{Schema, SchemaRef};
pub use spec::{
    validate_document, Info, Server, Specification, SpecificationBuilder, SpecReport, Tag,
    OPENAPI_VERSION,
};
pub use types::{Dialect, ParamLocation, PrimitiveType, VendorKeyword};
pub use validator::{
    close_additional_properties, OptionsProvider, SchemaValidator, ValidationEnv,
    ValidatorOptions,
};

#[cfg(feature = "remote")]
pub use loader::load_document_url;
