// Multi-peer scenarios: two sessions exchanging deltas in memory.

use serde_json::json;
use weaver_editor_core::{
    ExportedNode, NodeClass, NodeKey, NodeRegistry, Point, ROOT_KEY, RangeSelection, UndoManager,
    UpdateOptions,
};
use weaver_editor_crdt::{CollabConfig, CollabSession, CrdtError, PresenceChange};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn config(peer: u64) -> CollabConfig {
    CollabConfig {
        peer_id: Some(peer),
        user_name: format!("peer-{peer}").into(),
        undo_merge_interval_ms: 0,
        ..Default::default()
    }
}

fn session(peer: u64) -> CollabSession {
    init_tracing();
    CollabSession::new(config(peer), NodeRegistry::standard()).unwrap()
}

/// Peer 1 bootstraps an empty document, peer 2 joins from its snapshot.
fn pair() -> (CollabSession, CollabSession) {
    let mut a = session(1);
    a.bootstrap().unwrap();
    let mut b = session(2);
    b.import(&a.export_snapshot().unwrap()).unwrap();
    b.bootstrap().unwrap();
    (a, b)
}

fn deliver(from: &mut CollabSession, to: &mut CollabSession) {
    let delta = from.export_updates().unwrap();
    to.import(&delta).unwrap();
}

fn exchange(a: &mut CollabSession, b: &mut CollabSession) {
    let from_a = a.export_updates().unwrap();
    let from_b = b.export_updates().unwrap();
    b.import(&from_a).unwrap();
    a.import(&from_b).unwrap();
}

fn blocks(s: &CollabSession) -> Vec<NodeKey> {
    s.editor().state().children(ROOT_KEY).to_vec()
}

fn text_of(s: &CollabSession) -> String {
    s.editor().state().text_content()
}

fn exported(s: &CollabSession) -> ExportedNode {
    s.editor().state().export().unwrap()
}

/// Insert text into a block's first text child, creating it if needed.
fn type_text(s: &mut CollabSession, block: usize, offset: usize, text: &str) {
    s.update(UpdateOptions::new(), |u| {
        let p = u.state().children(ROOT_KEY)[block].clone();
        match u.state().children(&p).first().cloned() {
            Some(t) => u.insert_text(&t, offset, text),
            None => {
                let t = u.create_text(text)?;
                u.append_child(&p, &t)
            }
        }
    })
    .unwrap();
}

fn append_paragraph(s: &mut CollabSession, text: &str) -> NodeKey {
    s.update(UpdateOptions::new(), |u| {
        let p = u.create_node("paragraph")?;
        u.append_child(ROOT_KEY, &p)?;
        if !text.is_empty() {
            let t = u.create_text(text)?;
            u.append_child(&p, &t)?;
        }
        Ok(p)
    })
    .unwrap()
}

#[test]
fn test_bootstrap_creates_single_paragraph() {
    let mut a = session(1);
    a.bootstrap().unwrap();

    let blocks = blocks(&a);
    assert_eq!(blocks.len(), 1);
    let block = a.editor().state().node(&blocks[0]).unwrap();
    assert_eq!(block.node_type, "paragraph");
    assert!(!a.binding().is_shared_empty());
    // initial content is not an undo step
    assert!(!a.can_undo());
}

#[test]
fn test_join_from_snapshot_does_not_duplicate_root_block() {
    let (a, b) = pair();
    assert_eq!(blocks(&b).len(), 1);
    assert_eq!(exported(&a), exported(&b));
}

#[test]
fn test_typing_replicates() {
    let (mut a, mut b) = pair();
    type_text(&mut a, 0, 0, "hello");
    deliver(&mut a, &mut b);
    assert_eq!(text_of(&b), "hello");

    type_text(&mut b, 0, 5, " world");
    deliver(&mut b, &mut a);
    assert_eq!(text_of(&a), "hello world");
    insta::assert_yaml_snapshot!(exported(&a), @r###"
    type: root
    children:
      - type: paragraph
        children:
          - type: text
            properties:
              format: 0
            text: hello world
    "###);
    assert_eq!(exported(&a), exported(&b));
}

fn two_paragraph_scenario(a_first: bool) {
    let (mut a, mut b) = pair();
    type_text(&mut a, 0, 0, "Hello");
    append_paragraph(&mut b, "");

    let from_a = a.export_updates().unwrap();
    let from_b = b.export_updates().unwrap();
    if a_first {
        b.import(&from_a).unwrap();
        a.import(&from_b).unwrap();
    } else {
        a.import(&from_b).unwrap();
        b.import(&from_a).unwrap();
    }

    for peer in [&a, &b] {
        let blocks = blocks(peer);
        assert_eq!(blocks.len(), 2);
        assert_eq!(text_of(peer), "Hello\n\n");
    }
    assert_eq!(exported(&a), exported(&b));
}

#[test]
fn test_two_paragraph_scenario_a_first() {
    two_paragraph_scenario(true);
}

#[test]
fn test_two_paragraph_scenario_b_first() {
    two_paragraph_scenario(false);
}

#[test]
fn test_concurrent_edits_converge() {
    let (mut a, mut b) = pair();
    type_text(&mut a, 0, 0, "abc");
    append_paragraph(&mut a, "second");
    type_text(&mut b, 0, 0, "xyz");
    append_paragraph(&mut b, "third");
    exchange(&mut a, &mut b);

    assert_eq!(text_of(&a), text_of(&b));
    assert_eq!(exported(&a), exported(&b));
    assert_eq!(blocks(&a).len(), 3);
    assert_eq!(a.binding().shadow().len(), b.binding().shadow().len());

    // a second round on the merged document still converges
    type_text(&mut a, 1, 0, ">");
    type_text(&mut b, 2, 0, "<");
    exchange(&mut a, &mut b);
    assert_eq!(exported(&a), exported(&b));
}

#[test]
fn test_import_is_idempotent() {
    let (mut a, mut b) = pair();
    type_text(&mut a, 0, 0, "once");
    let delta = a.export_updates().unwrap();

    b.import(&delta).unwrap();
    let state = exported(&b);
    let version = b.version();
    let shadow_len = b.binding().shadow().len();

    b.import(&delta).unwrap();
    assert_eq!(exported(&b), state);
    assert_eq!(b.version(), version);
    assert_eq!(b.binding().shadow().len(), shadow_len);
}

#[test]
fn test_echo_is_not_reapplied() {
    let (mut a, _b) = pair();
    type_text(&mut a, 0, 0, "echo");
    let before = exported(&a);
    let delta = a.export_updates().unwrap();
    a.import(&delta).unwrap();
    a.import(&a.export_snapshot().unwrap()).unwrap();
    assert_eq!(exported(&a), before);
    assert_eq!(text_of(&a), "echo");
}

#[test]
fn test_undo_only_reverts_own_changes() {
    let (mut a, mut b) = pair();
    type_text(&mut a, 0, 0, "ab");
    deliver(&mut a, &mut b);

    type_text(&mut a, 0, 0, "x");
    type_text(&mut b, 0, 2, "y");
    exchange(&mut a, &mut b);
    assert_eq!(text_of(&a), "xaby");
    assert_eq!(text_of(&b), "xaby");

    assert!(a.can_undo());
    assert!(CollabSession::undo(&mut a).unwrap());
    assert_eq!(text_of(&a), "aby");
    deliver(&mut a, &mut b);
    assert_eq!(text_of(&b), "aby");

    assert!(CollabSession::redo(&mut a).unwrap());
    assert_eq!(text_of(&a), "xaby");
}

#[test]
fn test_undo_through_trait_and_clear_history() {
    let (mut a, _b) = pair();
    type_text(&mut a, 0, 0, "ab");
    assert!(UndoManager::undo(&mut a));
    assert_eq!(text_of(&a), "");
    assert!(a.can_redo());

    a.clear_history();
    assert!(!a.can_undo());
    assert!(!a.can_redo());
}

#[test]
fn test_remote_delete_recovers_selection() {
    let (mut a, mut b) = pair();
    type_text(&mut a, 0, 0, "one");
    append_paragraph(&mut a, "two");
    deliver(&mut a, &mut b);

    let b_blocks = blocks(&b);
    let doomed_text = b.editor().state().children(&b_blocks[1])[0].clone();
    b.set_selection(Some(RangeSelection::collapsed(Point::text(doomed_text, 1))))
        .unwrap();

    let a_second = blocks(&a)[1].clone();
    a.update(UpdateOptions::new(), |u| u.remove(&a_second))
        .unwrap();
    deliver(&mut a, &mut b);

    assert_eq!(blocks(&b).len(), 1);
    let survivor = blocks(&b)[0].clone();
    let selection = b.selection().unwrap();
    assert_eq!(selection.anchor.key, survivor);
    assert!(b.editor().state().contains(&selection.focus.key));
}

#[test]
fn test_remote_edit_keeps_local_caret() {
    let (mut a, mut b) = pair();
    type_text(&mut a, 0, 0, "hello");
    deliver(&mut a, &mut b);

    let b_text = b.editor().state().children(&blocks(&b)[0])[0].clone();
    b.set_selection(Some(RangeSelection::collapsed(Point::text(b_text.clone(), 2))))
        .unwrap();

    type_text(&mut a, 0, 0, "XX");
    deliver(&mut a, &mut b);

    assert_eq!(text_of(&b), "XXhello");
    let selection = b.selection().unwrap();
    assert_eq!(selection.anchor, Point::text(b_text, 4));
}

#[test]
fn test_root_emptied_remotely_is_repaired() {
    let (mut a, mut b) = pair();
    let only = blocks(&a)[0].clone();
    a.update(UpdateOptions::new(), |u| u.remove(&only)).unwrap();
    assert!(blocks(&a).is_empty());

    deliver(&mut a, &mut b);
    assert_eq!(blocks(&b).len(), 1);
    assert!(b.selection().is_some());
    // the repair is not something peer 2 can undo
    assert!(!b.can_undo());

    deliver(&mut b, &mut a);
    assert_eq!(blocks(&a).len(), 1);
    assert_eq!(exported(&a), exported(&b));
}

#[test]
fn test_unregistered_type_is_fatal() {
    init_tracing();
    let mut registry = NodeRegistry::standard();
    registry.register(NodeClass::element("callout"));
    let mut a = CollabSession::new(config(1), registry).unwrap();
    a.bootstrap().unwrap();
    let mut b = session(2);
    b.import(&a.export_snapshot().unwrap()).unwrap();
    b.bootstrap().unwrap();
    let before = exported(&b);

    a.update(UpdateOptions::new(), |u| {
        let callout = u.create_node("callout")?;
        u.append_child(ROOT_KEY, &callout)
    })
    .unwrap();
    let err = b.import(&a.export_updates().unwrap()).unwrap_err();
    assert!(err.is_fatal(), "unexpected error: {err:?}");
    assert!(matches!(err, CrdtError::UnregisteredNodeType { .. }));
    assert_eq!(exported(&b), before);
}

#[test]
fn test_failed_remote_batch_stops_local_mirroring() {
    init_tracing();
    let mut registry = NodeRegistry::standard();
    registry.register(NodeClass::element("callout"));
    let mut a = CollabSession::new(config(1), registry).unwrap();
    a.bootstrap().unwrap();
    type_text(&mut a, 0, 0, "hello");
    append_paragraph(&mut a, "world");
    let mut b = session(2);
    b.import(&a.export_snapshot().unwrap()).unwrap();
    b.bootstrap().unwrap();
    a.export_updates().unwrap();
    let before = exported(&b);

    // one commit touching both paragraphs; only the second one fails on peer 2
    a.update(UpdateOptions::new(), |u| {
        let blocks = u.state().children(ROOT_KEY).to_vec();
        let first = u.state().children(&blocks[0])[0].clone();
        u.insert_text(&first, 0, "X")?;
        let callout = u.create_node("callout")?;
        u.append_child(&blocks[1], &callout)
    })
    .unwrap();
    let err = b.import(&a.export_updates().unwrap()).unwrap_err();
    assert!(matches!(err, CrdtError::UnregisteredNodeType { .. }));
    assert_eq!(exported(&b), before);
    assert!(b.binding().is_desynced());
    let b_first = b.editor().state().children(&blocks(&b)[0])[0].clone();
    assert_eq!(b.binding().shadow().text(&b_first), Some("hello"));

    // local edits stay local instead of being diffed against stale state
    let err = b
        .update(UpdateOptions::new(), |u| u.insert_text(&b_first, 5, "!"))
        .unwrap_err();
    assert!(matches!(err, CrdtError::Desynchronized { .. }));
    assert!(err.is_fatal());

    deliver(&mut b, &mut a);
    let a_text = text_of(&a);
    assert!(a_text.starts_with("Xhello"), "peer 1 lost its edit: {a_text:?}");
    assert!(!a_text.contains('!'));
}

#[test]
fn test_malformed_import_leaves_state_unchanged() {
    let (mut a, mut b) = pair();
    type_text(&mut a, 0, 0, "kept");
    deliver(&mut a, &mut b);
    let before = exported(&b);
    let version = b.version();

    let err = b.import(b"definitely not a loro update").unwrap_err();
    assert!(matches!(err, CrdtError::Import(_)));
    assert!(!err.is_fatal());
    assert_eq!(exported(&b), before);
    assert_eq!(b.version(), version);

    // later imports still work
    type_text(&mut a, 0, 4, "!");
    deliver(&mut a, &mut b);
    assert_eq!(text_of(&b), "kept!");
}

#[test]
fn test_normalized_merge_replicates() {
    let (mut a, mut b) = pair();
    let bold = a
        .update(UpdateOptions::new(), |u| {
            let p = u.state().children(ROOT_KEY)[0].clone();
            let plain = u.create_text("hello")?;
            u.append_child(&p, &plain)?;
            let bold = u.create_text(" world")?;
            u.set_property(&bold, "format", json!(1))?;
            u.append_child(&p, &bold)?;
            Ok(bold)
        })
        .unwrap();
    deliver(&mut a, &mut b);
    let b_block = blocks(&b)[0].clone();
    assert_eq!(b.editor().state().children(&b_block).len(), 2);

    // un-bolding makes the runs mergeable
    a.update(UpdateOptions::new(), |u| u.set_property(&bold, "format", json!(0)))
        .unwrap();
    let a_block = blocks(&a)[0].clone();
    assert_eq!(a.editor().state().children(&a_block).len(), 1);
    assert_eq!(a.binding().shadow().children(&a_block).len(), 1);

    deliver(&mut a, &mut b);
    assert_eq!(b.editor().state().children(&b_block).len(), 1);
    assert_eq!(text_of(&b), "hello world");
    assert_eq!(exported(&a), exported(&b));

    // the survivor keeps editing in place
    type_text(&mut a, 0, 11, "!");
    deliver(&mut a, &mut b);
    assert_eq!(text_of(&b), "hello world!");
}

#[test]
fn test_merge_into_new_sibling_replicates() {
    let (mut a, mut b) = pair();
    a.update(UpdateOptions::new(), |u| {
        let p = u.state().children(ROOT_KEY)[0].clone();
        let bold = u.create_text("B")?;
        u.set_property(&bold, "format", json!(1))?;
        u.append_child(&p, &bold)?;
        let plain = u.create_text("tail")?;
        u.append_child(&p, &plain)
    })
    .unwrap();
    deliver(&mut a, &mut b);

    // a new plain run between the two absorbs the old plain one
    a.update(UpdateOptions::new(), |u| {
        let p = u.state().children(ROOT_KEY)[0].clone();
        let fresh = u.create_text("new ")?;
        u.insert_child(&p, 1, &fresh)
    })
    .unwrap();
    assert_eq!(text_of(&a), "Bnew tail");

    deliver(&mut a, &mut b);
    assert_eq!(text_of(&b), "Bnew tail");
    assert_eq!(exported(&a), exported(&b));
}

#[test]
fn test_line_breaks_and_decorators_replicate() {
    let (mut a, mut b) = pair();
    a.update(UpdateOptions::new(), |u| {
        let p = u.state().children(ROOT_KEY)[0].clone();
        let first = u.create_text("a")?;
        u.append_child(&p, &first)?;
        let br = u.create_node("linebreak")?;
        u.append_child(&p, &br)?;
        let second = u.create_text("b")?;
        u.append_child(&p, &second)?;

        let rule = u.create_node("horizontalrule")?;
        u.append_child(ROOT_KEY, &rule)?;
        let image = u.create_node("image")?;
        u.set_property(&image, "src", json!("https://example.com/cat.png"))?;
        u.set_property(&image, "alt", json!("a cat"))?;
        u.append_child(ROOT_KEY, &image)
    })
    .unwrap();
    deliver(&mut a, &mut b);

    assert_eq!(exported(&a), exported(&b));
    assert_eq!(blocks(&b).len(), 3);
    let image = b.editor().state().node(&blocks(&b)[2]).unwrap();
    assert_eq!(image.properties.get("alt"), Some(&json!("a cat")));

    // remove the line break on peer 2; the texts stay separate nodes
    let b_block = blocks(&b)[0].clone();
    let br = b.editor().state().children(&b_block)[1].clone();
    b.update(UpdateOptions::new().skip_transforms(), |u| u.remove(&br))
        .unwrap();
    deliver(&mut b, &mut a);
    assert_eq!(text_of(&a), "ab\n\n\n\n");
    assert_eq!(exported(&a), exported(&b));
}

#[test]
fn test_properties_replicate_and_excluded_stay_local() {
    init_tracing();
    let mut excluded = config(1);
    excluded
        .excluded_properties
        .insert("heading".into(), vec!["collapsed".into()]);
    let mut a = CollabSession::new(excluded.clone(), NodeRegistry::standard()).unwrap();
    a.bootstrap().unwrap();
    let mut b = CollabSession::new(
        CollabConfig {
            peer_id: Some(2),
            ..excluded
        },
        NodeRegistry::standard(),
    )
    .unwrap();
    b.import(&a.export_snapshot().unwrap()).unwrap();
    b.bootstrap().unwrap();

    let heading = a
        .update(UpdateOptions::new(), |u| {
            let h = u.create_node("heading")?;
            u.set_property(&h, "tag", json!("h2"))?;
            u.append_child(ROOT_KEY, &h)?;
            Ok(h)
        })
        .unwrap();
    deliver(&mut a, &mut b);
    let b_heading = blocks(&b)[1].clone();
    let node = b.editor().state().node(&b_heading).unwrap();
    assert_eq!(node.properties.get("tag"), Some(&json!("h2")));

    a.update(UpdateOptions::new(), |u| {
        u.set_property(&heading, "tag", json!("h3"))?;
        u.set_property(&heading, "collapsed", json!(true))
    })
    .unwrap();
    deliver(&mut a, &mut b);
    let node = b.editor().state().node(&b_heading).unwrap();
    assert_eq!(node.properties.get("tag"), Some(&json!("h3")));
    assert!(!node.properties.contains_key("collapsed"));

    // a property that shows up later on another instance is still mirrored
    a.update(UpdateOptions::new(), |u| u.set_property(&heading, "anchor", json!("intro")))
        .unwrap();
    deliver(&mut a, &mut b);
    let node = b.editor().state().node(&b_heading).unwrap();
    assert_eq!(node.properties.get("anchor"), Some(&json!("intro")));
}

#[test]
fn test_presence_resolves_remote_cursor() {
    let (mut a, mut b) = pair();
    type_text(&mut a, 0, 0, "hello");
    deliver(&mut a, &mut b);

    let a_text = a.editor().state().children(&blocks(&a)[0])[0].clone();
    a.set_selection(Some(RangeSelection::new(
        Point::text(a_text.clone(), 1),
        Point::text(a_text, 3),
    )))
    .unwrap();
    let bytes = a.local_presence_update().unwrap();
    assert_eq!(b.apply_presence(&bytes).unwrap(), PresenceChange::Updated(1));

    let b_text = b.editor().state().children(&blocks(&b)[0])[0].clone();
    let cursor = &b.remote_cursors()[&1];
    assert_eq!(cursor.name, "peer-1");
    let selection = cursor.selection.clone().unwrap();
    assert_eq!(selection.anchor, Point::text(b_text.clone(), 1));
    assert_eq!(selection.focus, Point::text(b_text.clone(), 3));

    // cursors follow local edits made after they arrived
    type_text(&mut b, 0, 0, "XX");
    let selection = b.remote_cursors()[&1].selection.clone().unwrap();
    assert_eq!(selection.anchor, Point::text(b_text, 3));

    // replaying the same message is ignored; leaving removes the cursor
    assert_eq!(b.apply_presence(&bytes).unwrap(), PresenceChange::Ignored);
    let leave = a.leave_presence().unwrap();
    assert_eq!(b.apply_presence(&leave).unwrap(), PresenceChange::Removed(1));
    assert!(b.remote_cursors().is_empty());
}

#[test]
fn test_presence_ahead_of_document_resolves_after_import() {
    let (mut a, mut b) = pair();
    let a_block = append_paragraph(&mut a, "fresh");
    let a_text = a.editor().state().children(&a_block)[0].clone();
    a.set_selection(Some(RangeSelection::new(
        Point::text(a_text, 2),
        Point::element(a_block, 1),
    )))
    .unwrap();

    // presence can overtake the delta that created the selected nodes
    let bytes = a.local_presence_update().unwrap();
    assert_eq!(b.apply_presence(&bytes).unwrap(), PresenceChange::Updated(1));
    assert_eq!(b.remote_cursors()[&1].selection, None);

    deliver(&mut a, &mut b);
    let b_block = blocks(&b)[1].clone();
    let b_text = b.editor().state().children(&b_block)[0].clone();
    let selection = b.remote_cursors()[&1].selection.clone().unwrap();
    assert_eq!(selection.anchor, Point::text(b_text, 2));
    assert_eq!(selection.focus, Point::element(b_block, 1));
}

#[test]
fn test_removed_text_node_slides_caret_into_parent() {
    let (mut a, mut b) = pair();
    a.update(UpdateOptions::new(), |u| {
        let p = u.state().children(ROOT_KEY)[0].clone();
        let one = u.create_text("one")?;
        u.append_child(&p, &one)?;
        let br = u.create_node("linebreak")?;
        u.append_child(&p, &br)?;
        let two = u.create_text("two")?;
        u.append_child(&p, &two)
    })
    .unwrap();
    deliver(&mut a, &mut b);

    let b_block = blocks(&b)[0].clone();
    let b_two = b.editor().state().children(&b_block)[2].clone();
    b.set_selection(Some(RangeSelection::collapsed(Point::text(b_two, 1))))
        .unwrap();

    a.update(UpdateOptions::new(), |u| {
        let p = u.state().children(ROOT_KEY)[0].clone();
        let two = u.state().children(&p)[2].clone();
        u.remove(&two)
    })
    .unwrap();
    deliver(&mut a, &mut b);

    assert_eq!(b.editor().state().children(&b_block).len(), 2);
    let selection = b.selection().unwrap();
    assert_eq!(selection.anchor, Point::element(b_block.clone(), 2));
    assert_eq!(selection.focus, Point::element(b_block, 2));
}

#[test]
fn test_presence_garbage_is_rejected() {
    let (_a, mut b) = pair();
    let err = b.apply_presence(&[0xff, 0xff, 0xff]).unwrap_err();
    assert!(matches!(err, CrdtError::Presence(_)));
    assert!(b.presence().is_empty());
}
