//! Integration tests for reference resolution.

use std::cell::Cell;

use schema_form::{resolve_refs, Fetch, FetchError, ModelBuilder, NoFetch, SchemaValidator, Selections, StaticFetcher};
use serde_json::{json, Value};
use url::Url;

/// Counts fetches on top of an in-memory fetcher.
struct CountingFetcher {
    inner: StaticFetcher,
    calls: Cell<usize>,
}

impl CountingFetcher {
    fn new(inner: StaticFetcher) -> Self {
        Self {
            inner,
            calls: Cell::new(0),
        }
    }
}

impl Fetch for CountingFetcher {
    async fn fetch(&self, url: &Url) -> Result<Value, FetchError> {
        self.calls.set(self.calls.get() + 1);
        self.inner.fetch(url).await
    }
}

fn base() -> Url {
    Url::parse("https://example.com/schemas/order.json").unwrap()
}

fn address_doc() -> Value {
    json!({
        "type": "object",
        "properties": {
            "street": { "type": "string" },
            "zip": { "$ref": "#/$defs/zip" }
        },
        "required": ["street"],
        "$defs": { "zip": { "type": "string", "pattern": "^[0-9]{5}$" } }
    })
}

// === Identity and idempotence ===

mod round_trip {
    use super::*;

    #[tokio::test]
    async fn schema_without_refs_is_unchanged() {
        let schema = json!({
            "$schema": "https://json-schema.org/draft/2020-12/schema",
            "type": "object",
            "properties": {
                "name": { "type": "string", "minLength": 1 },
                "tags": { "type": "array", "items": { "type": "string" } },
                "kind": { "oneOf": [{ "const": "a" }, { "const": "b" }] }
            },
            "required": ["name"],
            "if": { "properties": { "kind": { "const": "a" } } },
            "then": { "required": ["tags"] },
            "dependencies": { "name": ["kind"] }
        });
        let resolved = resolve_refs(&schema, None, &NoFetch).await;
        assert_eq!(resolved, schema);
    }

    #[tokio::test]
    async fn resolving_twice_is_a_no_op() {
        let schema = json!({
            "$defs": {
                "name": { "type": "string" },
                "person": {
                    "type": "object",
                    "properties": { "first": { "$ref": "#/$defs/name" } }
                }
            },
            "properties": {
                "buyer": { "$ref": "#/$defs/person" },
                "seller": { "$ref": "#/$defs/person" }
            }
        });
        let once = resolve_refs(&schema, None, &NoFetch).await;
        let twice = resolve_refs(&once, None, &NoFetch).await;
        assert_eq!(once, twice);
        assert_eq!(once["properties"]["seller"]["properties"]["first"]["type"], "string");
    }

    #[tokio::test]
    async fn resolving_recursive_schema_twice_is_a_no_op() {
        let schema = json!({
            "$defs": {
                "node": {
                    "type": "object",
                    "properties": {
                        "children": { "type": "array", "items": { "$ref": "#/$defs/node" } }
                    }
                }
            },
            "properties": { "tree": { "$ref": "#/$defs/node" } }
        });
        let once = resolve_refs(&schema, None, &NoFetch).await;
        let twice = resolve_refs(&once, None, &NoFetch).await;
        assert_eq!(once, twice);
        assert_eq!(once["properties"]["tree"], json!({ "$ref": "#/$defs/node" }));
    }

    #[tokio::test]
    async fn input_schema_is_not_mutated() {
        let schema = json!({
            "$defs": { "a": { "type": "integer" } },
            "properties": { "a": { "$ref": "#/$defs/a" } }
        });
        let before = schema.clone();
        let _ = resolve_refs(&schema, None, &NoFetch).await;
        assert_eq!(schema, before);
    }
}

// === Local references ===

mod local_refs {
    use super::*;

    #[tokio::test]
    async fn nested_refs_in_target_are_expanded() {
        let schema = json!({
            "definitions": {
                "money": {
                    "type": "object",
                    "properties": { "amount": { "$ref": "#/definitions/amount" } }
                },
                "amount": { "type": "number", "minimum": 0 }
            },
            "properties": { "total": { "$ref": "#/definitions/money" } }
        });
        let resolved = resolve_refs(&schema, None, &NoFetch).await;
        assert_eq!(
            resolved["properties"]["total"]["properties"]["amount"],
            json!({ "type": "number", "minimum": 0 })
        );
    }

    #[tokio::test]
    async fn siblings_win_over_target_keys() {
        let schema = json!({
            "$defs": { "s": { "title": "Shared", "type": "string" } },
            "properties": { "a": { "$ref": "#/$defs/s", "title": "Local" } }
        });
        let resolved = resolve_refs(&schema, None, &NoFetch).await;
        assert_eq!(resolved["properties"]["a"], json!({ "title": "Local", "type": "string" }));
    }

    #[tokio::test]
    async fn escaped_pointer_tokens() {
        let schema = json!({
            "$defs": { "a/b": { "type": "boolean" } },
            "properties": { "flag": { "$ref": "#/$defs/a~1b" } }
        });
        let resolved = resolve_refs(&schema, None, &NoFetch).await;
        assert_eq!(resolved["properties"]["flag"]["type"], "boolean");
    }

    #[tokio::test]
    async fn missing_target_leaves_ref() {
        let schema = json!({
            "properties": { "a": { "$ref": "#/$defs/nope", "description": "kept" } }
        });
        let resolved = resolve_refs(&schema, None, &NoFetch).await;
        assert_eq!(
            resolved["properties"]["a"],
            json!({ "$ref": "#/$defs/nope", "description": "kept" })
        );
    }

    #[tokio::test]
    async fn refs_in_every_schema_position() {
        let schema = json!({
            "$defs": { "s": { "type": "string" } },
            "prefixItems": [{ "$ref": "#/$defs/s" }],
            "additionalProperties": { "$ref": "#/$defs/s" },
            "patternProperties": { "^x-": { "$ref": "#/$defs/s" } },
            "anyOf": [{ "$ref": "#/$defs/s" }],
            "not": { "$ref": "#/$defs/s" },
            "dependentSchemas": { "a": { "$ref": "#/$defs/s" } },
            "propertyNames": { "$ref": "#/$defs/s" }
        });
        let resolved = resolve_refs(&schema, None, &NoFetch).await;
        let string = json!({ "type": "string" });
        assert_eq!(resolved["prefixItems"][0], string);
        assert_eq!(resolved["additionalProperties"], string);
        assert_eq!(resolved["patternProperties"]["^x-"], string);
        assert_eq!(resolved["anyOf"][0], string);
        assert_eq!(resolved["not"], string);
        assert_eq!(resolved["dependentSchemas"]["a"], string);
        assert_eq!(resolved["propertyNames"], string);
    }
}

// === Circular references ===

mod circular {
    use super::*;

    #[tokio::test]
    async fn self_referencing_definition_terminates() {
        let schema = json!({
            "type": "object",
            "properties": { "a": { "$ref": "#/$defs/a" } },
            "$defs": { "a": { "$ref": "#/$defs/a" } }
        });
        let resolved = resolve_refs(&schema, None, &NoFetch).await;
        assert_eq!(resolved["properties"]["a"], json!({ "$ref": "#/$defs/a" }));

        // The cut point builds as an empty schema
        let validator = SchemaValidator::new();
        let selections = Selections::new();
        let root = ModelBuilder::new(&validator, None, &selections).build(&resolved, None, false, "");
        assert!(root.node("/a").is_some());
    }

    #[tokio::test]
    async fn recursive_entry_stays_a_ref() {
        let schema = json!({
            "$defs": {
                "node": {
                    "type": "object",
                    "properties": {
                        "label": { "type": "string" },
                        "children": { "type": "array", "items": { "$ref": "#/$defs/node" } }
                    }
                }
            },
            "$ref": "#/$defs/node"
        });
        let resolved = resolve_refs(&schema, None, &NoFetch).await;
        assert_eq!(resolved["$ref"], "#/$defs/node");
        assert_eq!(
            resolved["$defs"]["node"]["properties"]["children"]["items"],
            json!({ "$ref": "#/$defs/node" })
        );
        assert_eq!(resolved["$defs"]["node"]["properties"]["label"]["type"], "string");
    }

    #[tokio::test]
    async fn mutual_recursion_terminates() {
        let schema = json!({
            "$defs": {
                "a": { "properties": { "b": { "$ref": "#/$defs/b" } } },
                "b": { "properties": { "a": { "$ref": "#/$defs/a" } } }
            },
            "properties": { "start": { "$ref": "#/$defs/a" } }
        });
        let resolved = resolve_refs(&schema, None, &NoFetch).await;
        assert_eq!(resolved["properties"]["start"], json!({ "$ref": "#/$defs/a" }));
        assert_eq!(
            resolved["$defs"]["a"]["properties"]["b"]["properties"]["a"],
            json!({ "$ref": "#/$defs/a" })
        );
    }
}

// === External references ===

mod external {
    use super::*;

    fn fetcher() -> StaticFetcher {
        StaticFetcher::new().with(
            &Url::parse("https://example.com/schemas/address.json").unwrap(),
            address_doc(),
        )
    }

    #[tokio::test]
    async fn relative_ref_joins_base_uri() {
        let schema = json!({ "properties": { "ship_to": { "$ref": "address.json" } } });
        let resolved = resolve_refs(&schema, Some(&base()), &fetcher()).await;
        let ship_to = &resolved["properties"]["ship_to"];
        assert_eq!(ship_to["required"], json!(["street"]));
        // Internal refs of the fetched document resolve against that document
        assert_eq!(ship_to["properties"]["zip"]["pattern"], "^[0-9]{5}$");
    }

    #[tokio::test]
    async fn root_id_is_the_fallback_base() {
        let schema = json!({
            "$id": "https://example.com/schemas/order.json",
            "properties": { "ship_to": { "$ref": "address.json" } }
        });
        let resolved = resolve_refs(&schema, None, &fetcher()).await;
        assert_eq!(resolved["properties"]["ship_to"]["type"], "object");
    }

    #[tokio::test]
    async fn fragment_into_external_document() {
        let schema = json!({
            "properties": { "zip": { "$ref": "address.json#/$defs/zip" } }
        });
        let resolved = resolve_refs(&schema, Some(&base()), &fetcher()).await;
        assert_eq!(resolved["properties"]["zip"]["type"], "string");
    }

    #[tokio::test]
    async fn document_is_fetched_once_per_pass() {
        let schema = json!({
            "properties": {
                "ship_to": { "$ref": "address.json" },
                "bill_to": { "$ref": "address.json" },
                "street": { "$ref": "address.json#/properties/street" }
            }
        });
        let counting = CountingFetcher::new(fetcher());
        let resolved = resolve_refs(&schema, Some(&base()), &counting).await;
        assert_eq!(counting.calls.get(), 1);
        assert_eq!(resolved["properties"]["ship_to"], resolved["properties"]["bill_to"]);
        assert_eq!(resolved["properties"]["street"], json!({ "type": "string" }));
    }

    #[tokio::test]
    async fn caches_do_not_outlive_a_pass() {
        let schema = json!({ "properties": { "a": { "$ref": "address.json" } } });
        let counting = CountingFetcher::new(fetcher());
        resolve_refs(&schema, Some(&base()), &counting).await;
        resolve_refs(&schema, Some(&base()), &counting).await;
        assert_eq!(counting.calls.get(), 2);
    }

    #[tokio::test]
    async fn fetch_failure_leaves_ref_and_continues() {
        let schema = json!({
            "$defs": { "name": { "type": "string" } },
            "properties": {
                "remote": { "$ref": "https://unreachable.example/x.json" },
                "name": { "$ref": "#/$defs/name" }
            }
        });
        let counting = CountingFetcher::new(StaticFetcher::new());
        let resolved = resolve_refs(&schema, None, &counting).await;
        assert_eq!(
            resolved["properties"]["remote"],
            json!({ "$ref": "https://unreachable.example/x.json" })
        );
        assert_eq!(resolved["properties"]["name"], json!({ "type": "string" }));
        assert_eq!(counting.calls.get(), 1);
    }

    #[tokio::test]
    async fn relative_ref_without_base_is_left() {
        let schema = json!({ "properties": { "a": { "$ref": "address.json" } } });
        let counting = CountingFetcher::new(fetcher());
        let resolved = resolve_refs(&schema, None, &counting).await;
        assert_eq!(resolved["properties"]["a"], json!({ "$ref": "address.json" }));
        assert_eq!(counting.calls.get(), 0);
    }

    #[tokio::test]
    async fn external_cycle_is_contained() {
        let a = Url::parse("https://example.com/schemas/a.json").unwrap();
        let b = Url::parse("https://example.com/schemas/b.json").unwrap();
        let fetcher = StaticFetcher::new()
            .with(&a, json!({ "properties": { "b": { "$ref": "b.json" } } }))
            .with(&b, json!({ "properties": { "a": { "$ref": "a.json" } } }));
        let schema = json!({ "$ref": "a.json" });
        let resolved = resolve_refs(&schema, Some(&base()), &fetcher).await;

        // The recursive document is copied into the result and referenced locally
        let local = "#/$defs/https___example.com_schemas_a.json";
        assert_eq!(resolved["$ref"], local);
        let embedded = &resolved["$defs"]["https___example.com_schemas_a.json"];
        assert_eq!(embedded["properties"]["b"]["properties"]["a"], json!({ "$ref": local }));

        let again = resolve_refs(&resolved, Some(&base()), &NoFetch).await;
        assert_eq!(again, resolved);
    }

    #[tokio::test]
    async fn recursive_external_definition_validates() {
        let tree = Url::parse("https://example.com/schemas/tree.json").unwrap();
        let fetcher = StaticFetcher::new().with(
            &tree,
            json!({
                "definitions": {
                    "node": {
                        "type": "object",
                        "properties": {
                            "kids": { "type": "array", "items": { "$ref": "#/definitions/node" } }
                        }
                    }
                }
            }),
        );
        let schema = json!({ "properties": { "tree": { "$ref": "tree.json#/definitions/node" } } });
        let resolved = resolve_refs(&schema, Some(&base()), &fetcher).await;

        let validator = SchemaValidator::new();
        let good = json!({ "tree": { "kids": [{ "kids": [] }] } });
        assert!(validator.validate(&resolved, &good).is_empty());
        let bad = json!({ "tree": { "kids": [{ "kids": 1 }] } });
        let errors = validator.validate(&resolved, &bad);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].instance_path, "/tree/kids/0/kids");
    }
}

// === HTTP fetching ===

#[cfg(feature = "remote")]
mod remote {
    use super::*;
    use schema_form::UrlFetcher;

    #[tokio::test]
    async fn fetches_external_ref_over_http() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/schemas/address.json")
            .match_header("accept", "application/json")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(address_doc().to_string())
            .expect(1)
            .create_async()
            .await;

        let base = Url::parse(&format!("{}/schemas/order.json", server.url())).unwrap();
        let schema = json!({
            "properties": {
                "ship_to": { "$ref": "address.json" },
                "bill_to": { "$ref": "address.json" }
            }
        });
        let resolved = resolve_refs(&schema, Some(&base), &UrlFetcher::new()).await;
        assert_eq!(resolved["properties"]["bill_to"]["required"], json!(["street"]));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn http_error_degrades_to_unresolved() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/schemas/missing.json")
            .with_status(500)
            .create_async()
            .await;

        let base = Url::parse(&format!("{}/schemas/order.json", server.url())).unwrap();
        let schema = json!({ "properties": { "a": { "$ref": "missing.json" } } });
        let resolved = resolve_refs(&schema, Some(&base), &UrlFetcher::new()).await;
        assert_eq!(resolved["properties"]["a"], json!({ "$ref": "missing.json" }));
    }
}
