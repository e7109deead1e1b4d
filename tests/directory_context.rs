//! End-to-end exercises of `DirectoryContext` against a scripted
//! in-memory connection, covering the testable properties of §8:
//! no-network short-circuiting, paging sequencing, duplicate-control
//! rejection, and minimal-diff updates.

use ldap_query::connection::{entry, RecordingConnection, WireResponse};
use ldap_query::context::{DirectoryContext, DirectoryContextOptions, EntryValue, QueryResult, SingleConnectionFactory};
use ldap_query::convert::{AttributeValue, ConverterKind};
use ldap_query::mapping::{ClassMap, ClassMapBuilder, DirectoryMapped, PropertyMapBuilder};
use ldap_query::scope::Scope;
use ldap_query::translator::query::{ExtraControl, QueryBuilder};
use ldap_query::{Error, Expr, Literal, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Default, Debug)]
struct Person {
    pub dn: String,
    pub cn: String,
    pub mail: Vec<String>,
}

impl DirectoryMapped for Person {
    fn build_class_map() -> Result<ClassMap<Person>> {
        ClassMapBuilder::new()
            .naming_context("ou=people,dc=example,dc=com")
            .object_class("person", true)
            .property(
                PropertyMapBuilder::new(
                    "Dn",
                    "distinguishedName",
                    ConverterKind::DistinguishedName,
                    |p: &Person| AttributeValue::Dn(p.dn.clone()),
                    |p: &mut Person, v| {
                        if let AttributeValue::Dn(dn) = v {
                            p.dn = dn;
                        }
                        Ok(())
                    },
                )
                .distinguished_name()
                .build(),
            )
            .property(
                PropertyMapBuilder::new(
                    "Cn",
                    "cn",
                    ConverterKind::Utf8String,
                    |p: &Person| AttributeValue::Str(p.cn.clone()),
                    |p: &mut Person, v| {
                        if let AttributeValue::Str(s) = v {
                            p.cn = s;
                        }
                        Ok(())
                    },
                )
                .build(),
            )
            .property(
                PropertyMapBuilder::new(
                    "Mail",
                    "mail",
                    ConverterKind::Utf8String,
                    |p: &Person| AttributeValue::Multi(p.mail.iter().cloned().map(AttributeValue::Str).collect()),
                    |p: &mut Person, v| {
                        if let AttributeValue::Multi(vs) = v {
                            p.mail = vs
                                .into_iter()
                                .filter_map(|v| if let AttributeValue::Str(s) = v { Some(s) } else { None })
                                .collect();
                        }
                        Ok(())
                    },
                )
                .multi_valued()
                .build(),
            )
            .build()
    }
}

fn context(conn: RecordingConnection, registry_key: &str) -> (DirectoryContext, Arc<RecordingConnection>) {
    let conn = Arc::new(conn);
    let options = DirectoryContextOptions::new(Arc::new(SingleConnectionFactory::new(conn.clone()))).registry_key(registry_key);
    (DirectoryContext::new(options), conn)
}

#[tokio::test]
async fn false_predicate_short_circuits_without_a_network_call() {
    let conn = RecordingConnection::new();
    let (ctx, conn) = context(conn, "integration-short-circuit");
    let ops = QueryBuilder::<Person>::new().filter(Expr::Constant(Literal::Bool(false))).into_ops();
    let result = ctx.query::<Person>(ops).await.unwrap();
    assert!(matches!(result, QueryResult::List(rows) if rows.is_empty()));
}

#[tokio::test]
async fn query_pages_through_a_cookie_and_materializes_every_entry() {
    let conn = RecordingConnection::new();
    conn.push_search(vec![entry("cn=alice,ou=people,dc=example,dc=com", &[("cn", vec!["alice"])])], Some(b"page2".to_vec()));
    conn.push_search(vec![entry("cn=bob,ou=people,dc=example,dc=com", &[("cn", vec!["bob"])])], Some(Vec::new()));
    let (ctx, conn) = context(conn, "integration-paging");

    let ops = QueryBuilder::<Person>::new().order_by("Cn").page(1).into_ops();
    let result = ctx.query::<Person>(ops).await.unwrap();
    let QueryResult::List(rows) = result else { panic!("expected a list result") };
    assert_eq!(rows.len(), 2);
    let names: Vec<String> = rows
        .into_iter()
        .map(|row| match row {
            EntryValue::Entry(e) => e.cn.clone(),
            _ => panic!("expected materialised entries"),
        })
        .collect();
    assert_eq!(names, vec!["alice", "bob"]);
    assert_eq!(conn.requests().len(), 2);
}

#[tokio::test]
async fn update_sends_only_the_changed_attributes() {
    let conn = RecordingConnection::new();
    conn.push_search(
        vec![entry(
            "cn=alice,ou=people,dc=example,dc=com",
            &[("cn", vec!["alice"]), ("mail", vec!["alice@old.example.com", "alice@example.com"])],
        )],
        None,
    );
    conn.push_ok();
    let (ctx, conn) = context(conn, "integration-update");

    let ops = QueryBuilder::<Person>::new().filter(Expr::prop("Cn").eq("alice")).single().into_ops();
    let result = ctx.query::<Person>(ops).await.unwrap();
    let QueryResult::Single(EntryValue::Entry(mut tracked)) = result else { panic!("expected a single entry") };

    // Drop one of the two addresses; the diff sent to the server should
    // contain only that removal, not a full replace of every attribute.
    tracked.mail = vec!["alice@example.com".to_owned()];
    ctx.update(&tracked).await.unwrap();
}

#[tokio::test]
async fn duplicate_controls_are_rejected_before_any_request_is_sent() {
    let conn = RecordingConnection::new();
    let (ctx, conn) = context(conn, "integration-dup-controls");
    let ops = QueryBuilder::<Person>::new()
        .include_controls(vec![
            ExtraControl { oid: "1.2.3.4".into(), critical: false, value: None },
            ExtraControl { oid: "1.2.3.4".into(), critical: false, value: None },
        ])
        .into_ops();
    let err = ctx.query::<Person>(ops).await.unwrap_err();
    assert!(matches!(err, Error::Translation(_)));
}

#[tokio::test]
async fn any_rewrites_to_a_bounded_lookup() {
    let conn = RecordingConnection::new();
    conn.push_search(vec![entry("cn=alice,ou=people,dc=example,dc=com", &[("cn", vec!["alice"])])], None);
    let (ctx, conn) = context(conn, "integration-any");
    let ops = QueryBuilder::<Person>::new().any_where(Expr::prop("Cn").eq("alice")).into_ops();
    let result = ctx.query::<Person>(ops).await.unwrap();
    assert!(matches!(result, QueryResult::Any(true)));
}

#[tokio::test]
async fn delete_propagates_server_failure() {
    let conn = RecordingConnection::new();
    conn.push_response(Ok(WireResponse::Outcome { rc: 32, matched: String::new(), text: "no such object".into() }));
    let (ctx, conn) = context(conn, "integration-delete-failure");
    let err = ctx.delete("cn=ghost,ou=people,dc=example,dc=com", vec![]).await.unwrap_err();
    assert!(matches!(err, Error::DirectoryOperation(_)));
}

#[tokio::test]
async fn select_many_returns_every_value_of_the_multi_valued_attribute() {
    let conn = RecordingConnection::new();
    conn.push_search(
        vec![entry(
            "cn=alice,ou=people,dc=example,dc=com",
            &[("cn", vec!["alice"]), ("mail", vec!["alice@example.com", "alice@work.example.com"])],
        )],
        None,
    );
    let (ctx, conn) = context(conn, "integration-select-many");
    let ops = QueryBuilder::<Person>::new().filter(Expr::prop("Cn").eq("alice")).select_many("Mail").into_ops();
    let result = ctx.query::<Person>(ops).await.unwrap();
    let QueryResult::List(mut rows) = result else { panic!("expected a list result") };
    let EntryValue::Many(values) = rows.remove(0) else { panic!("expected a Many projection") };
    let addresses: Vec<String> = values
        .into_iter()
        .map(|v| match v {
            AttributeValue::Str(s) => s,
            other => panic!("unexpected value: {other:?}"),
        })
        .collect();
    assert_eq!(addresses, vec!["alice@example.com", "alice@work.example.com"]);
}

#[tokio::test]
async fn as_dynamic_returns_raw_attributes_without_a_class_map_hit() {
    let conn = RecordingConnection::new();
    conn.push_search(
        vec![entry("cn=alice,ou=people,dc=example,dc=com", &[("cn", vec!["alice"]), ("mail", vec!["alice@example.com"])])],
        None,
    );
    let (ctx, conn) = context(conn, "integration-as-dynamic");
    let ops = QueryBuilder::<Person>::new().filter(Expr::prop("Cn").eq("alice")).as_dynamic().into_ops();
    let result = ctx.query::<Person>(ops).await.unwrap();
    let QueryResult::List(mut rows) = result else { panic!("expected a list result") };
    let EntryValue::Dynamic(dn, attrs) = rows.remove(0) else { panic!("expected a dynamic entry") };
    assert_eq!(dn, "cn=alice,ou=people,dc=example,dc=com");
    assert_eq!(attrs.get("mail").unwrap(), &[b"alice@example.com".to_vec()]);
}

#[tokio::test]
async fn untyped_query_entries_gates_on_object_class_alone() {
    let conn = RecordingConnection::new();
    conn.push_search(vec![entry("cn=anything,ou=people,dc=example,dc=com", &[("cn", vec!["anything"])])], None);
    let (ctx, conn) = context(conn, "integration-query-entries");
    let rows = ctx
        .query_entries("ou=people,dc=example,dc=com", Scope::Subtree, &["person".to_owned()], None)
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].dn, "cn=anything,ou=people,dc=example,dc=com");
    let sent = conn.requests();
    assert_eq!(sent.len(), 1);
}

#[test]
fn sync_api_runs_end_to_end_without_a_tokio_runtime() {
    let conn = RecordingConnection::new();
    conn.push_search(vec![entry("cn=alice,ou=people,dc=example,dc=com", &[("cn", vec!["alice"])])], None);
    let (ctx, conn) = context(conn, "integration-sync-api");
    let ops = QueryBuilder::<Person>::new().filter(Expr::prop("Cn").eq("alice")).into_ops();
    let result = ctx.query_sync::<Person>(ops).unwrap();
    let QueryResult::List(mut rows) = result else { panic!("expected a list result") };
    let EntryValue::Entry(tracked) = rows.remove(0) else { panic!("expected a materialised entry") };
    assert_eq!(tracked.cn, "alice");
}

#[derive(Default, Debug)]
struct Auditee {
    pub dn: String,
    pub cn: String,
}

impl DirectoryMapped for Auditee {
    fn build_class_map() -> Result<ClassMap<Auditee>> {
        ClassMapBuilder::new()
            .naming_context("ou=auditees,dc=example,dc=com")
            .object_class("auditee", true)
            .property(
                PropertyMapBuilder::new(
                    "Dn",
                    "distinguishedName",
                    ConverterKind::DistinguishedName,
                    |a: &Auditee| AttributeValue::Dn(a.dn.clone()),
                    |a: &mut Auditee, v| {
                        if let AttributeValue::Dn(dn) = v {
                            a.dn = dn;
                        }
                        Ok(())
                    },
                )
                .distinguished_name()
                .build(),
            )
            .property(
                PropertyMapBuilder::new(
                    "Cn",
                    "cn",
                    ConverterKind::Utf8String,
                    |a: &Auditee| AttributeValue::Str(a.cn.clone()),
                    |a: &mut Auditee, v| {
                        if let AttributeValue::Str(s) = v {
                            a.cn = s;
                        }
                        Ok(())
                    },
                )
                .build(),
            )
            .pre_add(|a: &Auditee| {
                if a.cn.is_empty() {
                    Err(Error::Translation("cn must not be empty".into()))
                } else {
                    Ok(())
                }
            })
            .post_add(|_: &Auditee| {
                ADD_LISTENER_FIRED.store(true, Ordering::SeqCst);
                Ok(())
            })
            .build()
    }
}

static ADD_LISTENER_FIRED: AtomicBool = AtomicBool::new(false);

#[tokio::test]
async fn pre_add_listener_vetoes_before_any_wire_call() {
    let conn = RecordingConnection::new();
    let (ctx, conn) = context(conn, "integration-pre-add-veto");
    let victim = Auditee { dn: "cn=,ou=auditees,dc=example,dc=com".to_owned(), cn: String::new() };
    let err = ctx.add(&victim).await.unwrap_err();
    assert!(matches!(err, Error::Translation(_)));
}

#[tokio::test]
async fn post_add_listener_fires_after_a_successful_add() {
    let conn = RecordingConnection::new();
    conn.push_ok();
    let (ctx, conn) = context(conn, "integration-post-add-fires");
    ADD_LISTENER_FIRED.store(false, Ordering::SeqCst);
    let instance = Auditee { dn: "cn=carl,ou=auditees,dc=example,dc=com".to_owned(), cn: "carl".to_owned() };
    ctx.add(&instance).await.unwrap();
    assert!(ADD_LISTENER_FIRED.load(Ordering::SeqCst));
}

#[tokio::test]
async fn pre_delete_listener_can_veto_a_delete() {
    let conn = RecordingConnection::new();
    let options = DirectoryContextOptions::new(Arc::new(SingleConnectionFactory::new(Arc::new(conn))))
        .registry_key("integration-pre-delete-veto")
        .pre_delete(|dn: &str| Err(Error::Translation(format!("deletion of {dn} is not permitted"))));
    let ctx = DirectoryContext::new(options);
    let err = ctx.delete("cn=alice,ou=people,dc=example,dc=com", vec![]).await.unwrap_err();
    assert!(matches!(err, Error::Translation(_)));
}
