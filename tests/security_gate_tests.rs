//! Security Gate Tests
//!
//! Every write verb, server-side code operator and non-read method must be
//! refused before a run is registered, wherever it appears in the query.

mod common;

use common::*;
use shellql::shell::plan::{DISALLOWED_METHODS, DISALLOWED_OPERATORS};
use shellql::DbError;

fn assert_refused(query: &str) {
    let service = seeded_service();
    match service.prepare(query) {
        Err(DbError::SecurityViolation(_)) => {}
        other => panic!("{} should be a security violation, got {:?}", query, other),
    }
    assert!(service.start_query(query).is_none());
    assert!(service.registry().is_empty(), "{} leaked a run", query);
}

#[test]
fn test_write_methods_refused_in_any_position() {
    for verb in DISALLOWED_METHODS {
        assert_refused(&format!("db.orders.{}({{}})", verb));
        assert_refused(&format!("db.orders.find({{}}).{}()", verb));
        assert_refused(&format!("db.orders.find({{}}).limit(1) . {}({{}})", verb));
        assert_refused(&format!("db.orders.{}({{}})", verb.to_uppercase()));
    }
}

#[test]
fn test_verb_inside_argument_text_refused() {
    assert_refused(r#"db.orders.find({note: "x.drop()"})"#);
    assert_refused("db.orders.find({}).comment('db.users.deleteMany({})')");
}

#[test]
fn test_server_side_operators_refused() {
    for op in DISALLOWED_OPERATORS {
        assert_refused(&format!("db.orders.aggregate([{{\"{}\": \"x\"}}])", op));
        assert_refused(&format!("db.orders.find({{a: {{\"{}\": 1}}}})", op));
    }
    assert_refused("db.orders.find({$where: 'this.total > 1'})");
    assert_refused("db.orders.aggregate([{$match: {}}, {$out: 'copy'}])");
}

#[test]
fn test_non_read_methods_refused() {
    for query in [
        "db.orders.count({})",
        "db.orders.distinct('sku')",
        "db.orders.findOne({})",
        "db.orders.find({}).forEach(printjson)",
        "db.orders.find({}).toArray()",
        "db.orders.find({}).explain()",
    ] {
        assert_refused(query);
    }
}

#[test]
fn test_verbs_in_field_names_accepted() {
    let service = seeded_service();
    for query in [
        "db.orders.find({update_time: {$exists: false}})",
        "db.orders.find({}, {insertedBy: 1})",
        "db.drops.find({})",
        "db.orders.find({status: 'removed'})",
    ] {
        assert!(service.prepare(query).is_ok(), "{} should be accepted", query);
    }
}

#[test]
fn test_code_is_never_evaluated() {
    let service = seeded_service();
    for query in [
        "db.orders.find({total: 1 + 1})",
        "db.orders.find({total: Math.max(1, 2)})",
        "db.orders.find(function() { return true; })",
        "db.orders.find({a: __import__('os')})",
    ] {
        match service.prepare(query) {
            Err(DbError::ArgumentParseError(_)) | Err(DbError::SyntaxError(_)) => {}
            other => panic!("{} should not parse, got {:?}", query, other),
        }
    }
    assert!(service.registry().is_empty());
}
