//! Strategy selection, error surfacing, naming, and serialization.

use pg_denorm::schema::StaticSchema;
use pg_denorm::sql::dsl::*;
use pg_denorm::sql::{Expression, FromItem, FuncCall, JoinKind, Select, TableRef};
use pg_denorm::{Cache, PgDenormError, Strategy, TriggerEvent, synthesize};

fn schema() -> StaticSchema {
    StaticSchema::new()
        .with_table(
            "orders",
            &[
                ("id", "bigint"),
                ("client_id", "bigint"),
                ("amount", "numeric"),
                ("status", "text"),
                ("tag_ids", "bigint[]"),
            ],
        )
        .with_table("clients", &[("id", "bigint")])
        .with_table(
            "clients_regions",
            &[("client_id", "bigint"), ("region_name", "text")],
        )
}

fn select_with(where_clause: Expression) -> Select {
    Select::new()
        .column("n", count_star())
        .from(FromItem::new(TableRef::new("orders")))
        .where_(where_clause)
}

fn cache_with(where_clause: Expression) -> Cache {
    Cache::new("c", TableRef::new("clients"), select_with(where_clause))
}

fn strategy_of(cache: &Cache) -> Strategy {
    synthesize(cache, &schema()).unwrap()["orders"].strategy
}

// ── Strategy selection ──────────────────────────────────────────────

#[test]
fn test_direct_linkage_is_commutative() {
    let cache = cache_with(eq(col("orders", "client_id"), col("clients", "id")));
    assert_eq!(strategy_of(&cache), Strategy::Commutative);
}

#[test]
fn test_or_linkage_stays_commutative() {
    let cache = cache_with(Expression::or_all([
        eq(col("orders", "client_id"), col("clients", "id")),
        eq(col("orders", "billing_client_id"), col("clients", "id")),
    ]));
    assert_eq!(strategy_of(&cache), Strategy::Commutative);
}

#[test]
fn test_array_linkage_stays_commutative() {
    let cache = cache_with(contains(col("orders", "tag_ids"), col("clients", "id")));
    assert_eq!(strategy_of(&cache), Strategy::Commutative);
}

#[test]
fn test_unrecognized_predicate_degrades_to_universal() {
    // Inequality linkage has no guard form; it must not abort synthesis.
    let cache = cache_with(binary(
        col("orders", "created_at"),
        ">=",
        col("clients", "since"),
    ));
    assert_eq!(strategy_of(&cache), Strategy::Universal);
}

#[test]
fn test_intermediate_table_forces_universal() {
    let cache = cache_with(Expression::and_all([
        eq(col("orders", "membership_id"), col("memberships", "id")),
        eq(col("memberships", "client_id"), col("clients", "id")),
    ]));
    assert_eq!(strategy_of(&cache), Strategy::Universal);
}

#[test]
fn test_distinct_count_forces_universal() {
    let cache = Cache::new(
        "c",
        TableRef::new("clients"),
        Select::new()
            .column(
                "n",
                func(FuncCall::new("count", vec![col("orders", "status")]).with_distinct()),
            )
            .from(FromItem::new(TableRef::new("orders")))
            .where_(eq(col("orders", "client_id"), col("clients", "id"))),
    );
    assert_eq!(strategy_of(&cache), Strategy::Universal);
}

#[test]
fn test_filtering_join_forces_universal() {
    // The joined table appears in WHERE, so it cannot collapse into a
    // lookup variable.
    let cache = Cache::new(
        "c",
        TableRef::new("clients"),
        Select::new()
            .column("n", count_star())
            .from(FromItem::new(TableRef::new("orders")).join(
                JoinKind::Inner,
                TableRef::new("clients_regions").aliased("cr"),
                eq(col("cr", "client_id"), col("orders", "client_id")),
            ))
            .where_(Expression::and_all([
                eq(col("orders", "client_id"), col("clients", "id")),
                eq(col("cr", "region_name"), lit_str("west")),
            ])),
    );
    let artifacts = synthesize(&cache, &schema()).unwrap();
    assert_eq!(artifacts["orders"].strategy, Strategy::Universal);
}

// ── Recoverable and fatal errors ────────────────────────────────────

#[test]
fn test_untraceable_from_table_is_skipped() {
    // A second FROM table with no path to the target gets no trigger; the
    // rest of the cache still synthesizes.
    let cache = Cache::new(
        "c",
        TableRef::new("clients"),
        Select::new()
            .column("n", count_star())
            .from(FromItem::new(TableRef::new("orders")))
            .from(FromItem::new(TableRef::new("audit_log")))
            .where_(eq(col("orders", "client_id"), col("clients", "id"))),
    );
    let artifacts = synthesize(&cache, &schema()).unwrap();
    assert!(artifacts.contains_key("orders"));
    assert!(!artifacts.contains_key("audit_log"));
}

#[test]
fn test_duplicate_alias_is_fatal() {
    let cache = Cache::new(
        "c",
        TableRef::new("clients"),
        Select::new()
            .column("n", count_star())
            .column("n", count_star())
            .from(FromItem::new(TableRef::new("orders"))),
    );
    let err = synthesize(&cache, &schema()).unwrap_err();
    assert!(matches!(err, PgDenormError::DuplicateColumnAlias(ref name) if name == "n"));
    assert!(!err.is_recoverable());
}

#[test]
fn test_missing_alias_is_fatal() {
    let cache = Cache::new(
        "c",
        TableRef::new("clients"),
        Select::new()
            .column("", count_star())
            .from(FromItem::new(TableRef::new("orders"))),
    );
    assert!(matches!(
        synthesize(&cache, &schema()),
        Err(PgDenormError::MissingColumnAlias)
    ));
}

#[test]
fn test_missing_lookup_column_type_is_fatal() {
    // Strategy B needs the lookup column's type to declare its variable.
    let cache = Cache::new(
        "c",
        TableRef::new("clients"),
        Select::new()
            .column(
                "names",
                func(FuncCall::new("array_agg", vec![col("cr", "region_name")])),
            )
            .from(FromItem::new(TableRef::new("orders")).join(
                JoinKind::Left,
                TableRef::new("clients_regions").aliased("cr"),
                eq(col("cr", "client_id"), col("orders", "client_id")),
            ))
            .where_(eq(col("orders", "client_id"), col("clients", "id"))),
    );
    let bare_schema = StaticSchema::new();
    let err = synthesize(&cache, &bare_schema).unwrap_err();
    assert!(matches!(
        err,
        PgDenormError::UnknownColumn { ref table, ref column }
            if table == "clients_regions" && column == "region_name"
    ));
}

// ── Trigger metadata ────────────────────────────────────────────────

#[test]
fn test_update_of_lists_sorted_mutable_columns() {
    let call = FuncCall::new("sum", vec![col("orders", "amount")])
        .with_filter(eq(col("orders", "status"), lit_str("paid")));
    let cache = Cache::new(
        "paid_total",
        TableRef::new("clients"),
        Select::new()
            .column("paid_total", func(call))
            .from(FromItem::new(TableRef::new("orders")))
            .where_(eq(col("orders", "client_id"), col("clients", "id"))),
    );
    let artifacts = synthesize(&cache, &schema()).unwrap();
    assert_eq!(
        artifacts["orders"].trigger.events,
        vec![
            TriggerEvent::Insert,
            TriggerEvent::Delete,
            TriggerEvent::UpdateOf(vec![
                "amount".to_string(),
                "client_id".to_string(),
                "status".to_string(),
            ]),
        ]
    );
}

#[test]
fn test_plain_update_event_when_only_pk_is_read() {
    let cache = cache_with(eq(col("orders", "id"), col("clients", "id")));
    let artifacts = synthesize(&cache, &schema()).unwrap();
    assert_eq!(
        artifacts["orders"].trigger.events,
        vec![
            TriggerEvent::Insert,
            TriggerEvent::Delete,
            TriggerEvent::Update,
        ]
    );
}

#[test]
fn test_schema_qualified_source_keeps_schema_in_ddl() {
    let cache = Cache::new(
        "c",
        TableRef::new("clients"),
        Select::new()
            .column("n", count_star())
            .from(FromItem::new(TableRef::with_schema("audit", "orders").aliased("o")))
            .where_(eq(col("o", "client_id"), col("clients", "id"))),
    );
    let artifacts = synthesize(&cache, &schema()).unwrap();
    let artifact = &artifacts["audit.orders"];
    assert_eq!(artifact.trigger.table, TableRef::with_schema("audit", "orders"));
    assert!(artifact.trigger.to_sql().contains(" ON audit.orders "));
}

#[test]
fn test_long_cache_name_stays_within_identifier_limit() {
    let cache = Cache::new(
        "a_very_long_cache_name_that_keeps_going_and_going_and_going_on",
        TableRef::new("clients"),
        select_with(eq(col("orders", "client_id"), col("clients", "id"))),
    );
    let artifacts = synthesize(&cache, &schema()).unwrap();
    let artifact = &artifacts["orders"];
    assert!(artifact.function_name.len() <= 63);
    assert!(artifact.trigger.name.len() <= 63);
    assert_ne!(artifact.function_name, artifact.trigger.name);
    // Shortened names end in the hash tag, still valid bare identifiers.
    let shortened = regex_lite::Regex::new(r"^[a-z_][a-z0-9_]*_[0-9a-f]{8}$").unwrap();
    assert!(shortened.is_match(&artifact.function_name));
    assert!(shortened.is_match(&artifact.trigger.name));
}

#[test]
fn test_quoted_identifiers_in_ddl() {
    let cache = Cache::new(
        "mixed",
        TableRef::new("Clients"),
        Select::new()
            .column("n", count_star())
            .from(FromItem::new(TableRef::new("orders")))
            .where_(eq(col("orders", "client_id"), col("Clients", "id"))),
    );
    let artifacts = synthesize(&cache, &schema()).unwrap();
    assert!(artifacts["orders"].function_sql.contains("UPDATE \"Clients\""));
}

// ── Serialization ───────────────────────────────────────────────────

#[test]
fn test_cache_json_round_trip_preserves_synthesis() {
    let cache = Cache::new(
        "orders_count",
        TableRef::new("clients"),
        select_with(Expression::and_all([
            eq(col("orders", "client_id"), col("clients", "id")),
            eq(col("orders", "status"), lit_str("paid")),
        ])),
    );
    let json = cache.to_json().unwrap();
    let restored = Cache::from_json(&json).unwrap();
    assert_eq!(
        synthesize(&cache, &schema()).unwrap(),
        synthesize(&restored, &schema()).unwrap()
    );
}
