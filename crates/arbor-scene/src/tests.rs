#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    use arbor_core::{Accessor, Dir, Error, Rect, Reply, Result};
    use serde_json::{Value, json};

    use crate::node::install_component;
    use crate::*;

    fn scene() -> Scene {
        let _ = env_logger::builder().is_test(true).try_init();
        initialize().unwrap();
        Scene::default()
    }

    fn pre_order(s: &Scene, root: NodeId) -> Vec<NodeId> {
        let mut out = vec![root];
        for c in s.children(root) {
            out.extend(pre_order(s, c));
        }
        out
    }

    fn names(s: &Scene, ids: &[NodeId]) -> Vec<String> {
        ids.iter()
            .map(|&id| s.node(id).unwrap().name().to_string())
            .collect()
    }

    #[test]
    fn test_path_resolution() {
        let mut s = scene();
        let a = s
            .create_pane(
                "a",
                &json!({"children": {"g": {"type": "Group", "children": {
                    "c": {"type": "Component"},
                    "d": {"type": "Component"}
                }}}}),
            )
            .unwrap();

        let c = s.resolve("a:/g/c").unwrap();
        assert_eq!(s.node(c).unwrap().name(), "c");
        assert_eq!(s.full_path(c).unwrap(), "a:/g/c");
        assert_eq!(s.full_path(a).unwrap(), "a:");

        let err = s.resolve("a:/g/x").unwrap_err();
        assert!(matches!(err, Error::PathNotFound { ref segment, .. } if segment == "x"));
        assert!(matches!(s.resolve("zz:/g").unwrap_err(), Error::PathNotFound { .. }));

        let g = s.path(c, "..").unwrap();
        assert_eq!(s.full_path(g).unwrap(), "a:/g");
        assert_eq!(s.path(g, "c").unwrap(), c);
        assert_eq!(s.path(c, "/g/c").unwrap(), c);
        assert_eq!(s.path(c, "./../d").unwrap(), s.resolve("a:/g/d").unwrap());
        assert!(matches!(
            s.path(a, "..").unwrap_err(),
            Error::PathNotFound { ref segment, .. } if segment == ".."
        ));
    }

    #[test]
    fn test_deleted_nodes_are_not_addressable() {
        let mut s = scene();
        let a = s.create_pane("a", &json!({})).unwrap();
        let g = s.create_child(a, "g", &json!({"type": "Group"})).unwrap();
        s.for_each(a, |s, child| s.delete(child)).unwrap();
        assert!(s.get(g).is_none());
        assert!(s.resolve("a:/g").is_err());
    }

    #[test]
    fn test_populate_is_idempotent() {
        let mut s = scene();
        let a = s.create_pane("a", &json!({})).unwrap();
        let g = s.create_child(a, "list", &json!({"type": "Group"})).unwrap();
        let template = json!({"type": "Component", "width": 10, "height": 4});

        let first = s.populate(g, &template, 5).unwrap();
        assert_eq!(first.created, vec!["0", "1", "2", "3", "4"]);
        let ids = s.children(g);

        let again = s.populate(g, &template, 5).unwrap();
        assert!(again.is_structural_noop());
        assert_eq!(again.updated.len(), 5);
        assert_eq!(s.children(g), ids);
    }

    #[test]
    fn test_populate_shrink_keeps_survivors() {
        let mut s = scene();
        let a = s.create_pane("a", &json!({})).unwrap();
        let g = s.create_child(a, "list", &json!({"type": "Group"})).unwrap();
        let template = json!({"type": "Component"});
        s.populate(g, &template, 5).unwrap();
        let ids = s.children(g);
        s.set(ids[1], "paint", json!({"hits": 3})).unwrap();

        let diff = s.populate(g, &template, 3).unwrap();
        assert_eq!(diff.removed, vec!["3", "4"]);
        assert!(diff.created.is_empty());
        assert_eq!(s.children(g), ids[..3].to_vec());
        assert_eq!(s.node(ids[1]).unwrap().paint()["hits"], json!(3));
        assert!(s.get(ids[3]).is_none());
        assert!(s.get(ids[4]).is_none());
    }

    #[test]
    fn test_populate_property_replaces_mismatched_types() {
        let mut s = scene();
        let a = s.create_pane("a", &json!({})).unwrap();
        let g = s.create_child(a, "list", &json!({"type": "Group"})).unwrap();
        s.configure(g, &json!({"populate": {"template": {"type": "Component"}, "count": 2}}))
            .unwrap();
        let before = s.children(g);

        s.configure(g, &json!({"populate": {"template": {"type": "Group"}, "count": 2}}))
            .unwrap();
        let after = s.children(g);
        assert_eq!(names(&s, &after), vec!["0", "1"]);
        assert!(after.iter().all(|&c| s.node(c).unwrap().is_group()));
        assert!(before.iter().all(|&c| s.get(c).is_none()));
    }

    #[test]
    fn test_pane_activation_is_atomic() {
        let mut s = scene();
        let a = s.create_pane("a", &json!({})).unwrap();
        let b = s.create_pane("b", &json!({})).unwrap();
        s.set_active_pane("a").unwrap();

        let seen = Rc::new(RefCell::new(Vec::new()));
        for pane in [a, b] {
            let seen = seen.clone();
            s.node(pane).unwrap().events().active_change.listen(move |s, on| {
                let flags = (
                    s.node(a)?.is_active(),
                    s.node(b)?.is_active(),
                    s.active_pane()?,
                );
                seen.borrow_mut().push((*on, flags));
                Ok(Reply::Unset)
            });
        }

        s.set_active_pane("b").unwrap();
        assert!(!s.node(a).unwrap().is_active());
        assert!(s.node(b).unwrap().is_active());
        assert_eq!(s.active_pane().unwrap(), Some(b));
        assert_eq!(
            *seen.borrow(),
            vec![(false, (false, true, Some(b))), (true, (false, true, Some(b)))]
        );
    }

    #[test]
    fn test_active_flag_follows_focus_chain() {
        let mut s = scene();
        let p = s
            .create_pane(
                "p",
                &json!({
                    "focus": "menu",
                    "children": {"menu": {"type": "Group", "focus": "item", "children": {
                        "item": {"type": "Component"},
                        "other": {"type": "Component"}
                    }}}
                }),
            )
            .unwrap();
        let item = s.resolve("p:/menu/item").unwrap();
        let other = s.resolve("p:/menu/other").unwrap();
        assert!(!s.node(item).unwrap().is_active());

        s.activate(p).unwrap();
        assert!(s.node(item).unwrap().is_active());
        assert!(s.node(item).unwrap().is_focused());

        let menu = s.resolve("p:/menu").unwrap();
        assert!(s.focus(menu, "other").unwrap());
        assert!(!s.node(item).unwrap().is_active());
        assert!(s.node(other).unwrap().is_active());
        assert_eq!(s.focus_chain(p), vec![p, menu, other]);
    }

    #[test]
    fn test_two_flagged_panes_surface_as_violation() {
        let mut s = scene();
        s.create_pane("a", &json!({"active": true})).unwrap();
        let b = s.create_pane("b", &json!({})).unwrap();
        s.get_mut(b).unwrap().flags.insert(NodeFlags::ACTIVE);
        assert!(matches!(
            s.active_pane().unwrap_err(),
            Error::InvariantViolation(_)
        ));
    }

    #[test]
    fn test_detach_fires_on_delete_once() {
        let mut s = scene();
        let a = s.create_pane("a", &json!({})).unwrap();
        let c = s.create_child(a, "c", &json!({"type": "Component"})).unwrap();
        let fx = s.attach(c, "fx", "Effect", &json!({"duration": 3})).unwrap();

        let fired = Rc::new(Cell::new(0));
        let f = fired.clone();
        s.extra_ref(fx).unwrap().on_delete().listen(move |s, _| {
            f.set(f.get() + 1);
            // detaching from inside on_delete is a no-op
            assert!(!s.detach(c, "fx")?);
            Ok(Reply::Unset)
        });

        assert!(s.detach(c, "fx").unwrap());
        assert_eq!(fired.get(), 1);
        assert!(s.extra(c, "fx").is_none());
        assert!(s.extra_ref(fx).is_err());
        assert!(!s.detach(c, "fx").unwrap());

        let again = s.attach(c, "fx", "Fade", &json!({})).unwrap();
        assert_ne!(again, fx);
        assert_eq!(s.extra_ref(again).unwrap().type_tag(), "Fade");
    }

    #[derive(Default)]
    struct StartRecord {
        value: i64,
        seen_at_start: Option<i64>,
    }

    fn counter_extra_ctor(s: &mut Scene, id: ExtraId) -> Result<()> {
        s.extra_mut(id)?.insert_state(StartRecord::default());
        s.map_extra_property(
            id,
            "value",
            extra_field::<StartRecord, _>(id, |p| &p.value, |p| &mut p.value),
            &[],
        )?;
        s.extra_ref(id)?.on_start().listen(move |s, _| {
            let rec = s.extra_state_mut::<StartRecord>(id)?;
            rec.seen_at_start = Some(rec.value);
            Ok(Reply::Unset)
        });
        Ok(())
    }

    #[test]
    fn test_on_start_sees_applied_configuration() {
        let mut s = scene();
        register_extra("StartCounter", counter_extra_ctor).unwrap();
        let a = s.create_pane("a", &json!({})).unwrap();
        let id = s.attach(a, "p", "StartCounter", &json!({"value": 7})).unwrap();
        assert_eq!(s.extra_state::<StartRecord>(id).unwrap().seen_at_start, Some(7));
        assert_eq!(s.extra_prop(id, "value").unwrap(), json!(7));
    }

    #[test]
    fn test_reaping_owner_detaches_extras() {
        let mut s = scene();
        let a = s.create_pane("a", &json!({})).unwrap();
        let c = s.create_child(a, "c", &json!({"type": "Component"})).unwrap();
        let fx = s.attach(c, "fx", "Effect", &json!({})).unwrap();
        let fired = Rc::new(Cell::new(false));
        let f = fired.clone();
        s.extra_ref(fx).unwrap().on_delete().listen(move |_, _| {
            f.set(true);
            Ok(Reply::Unset)
        });

        s.delete(c).unwrap();
        assert!(fired.get());
        assert!(s.extra_ref(fx).is_err());
    }

    #[test]
    fn test_modify_extras() {
        let mut s = scene();
        let a = s.create_pane("a", &json!({})).unwrap();
        let c = s.create_child(a, "c", &json!({"type": "Component"})).unwrap();

        s.configure(c, &json!({"extras": {"fx": {"type": "Effect", "duration": 5}}}))
            .unwrap();
        let fx = s.extra(c, "fx").unwrap();
        s.configure(c, &json!({"extras": {"fx": {"duration": 7}}})).unwrap();
        assert_eq!(s.extra(c, "fx"), Some(fx));
        assert_eq!(s.effect(fx).unwrap().duration, 7);

        s.configure(c, &json!({"extras": {"fx": null}})).unwrap();
        assert!(s.extra(c, "fx").is_none());

        let err = s
            .configure(c, &json!({"extras": {"new": {"duration": 1}}}))
            .unwrap_err();
        assert!(matches!(err, Error::MissingType { ref name } if name == "new"));

        let err = s
            .configure(c, &json!({"extras": {"x": {"type": "NoSuchExtra"}}}))
            .unwrap_err();
        assert!(matches!(
            err,
            Error::TypeNotRegistered { kind: arbor_core::RegistryKind::Extra, .. }
        ));
    }

    #[test]
    fn test_extra_lookup_up_the_tree() {
        let mut s = scene();
        let a = s.create_pane("a", &json!({})).unwrap();
        let g = s.create_child(a, "g", &json!({"type": "Group"})).unwrap();
        let c = s.create_child(g, "c", &json!({"type": "Component"})).unwrap();
        let fx = s.attach(g, "glow", "Effect", &json!({})).unwrap();

        assert_eq!(s.extra_by_type(g, "Effect"), Some(fx));
        assert_eq!(s.extra_by_type(c, "Effect"), None);
        assert_eq!(s.extra_by_type_from_parents(c, "Effect"), Some((g, fx)));
        assert_eq!(s.extra_by_type_from_parents(c, "Fade"), None);
    }

    #[test]
    fn test_redraw_bookings_coalesce() {
        let mut s = scene();
        let a = s.create_pane("a", &json!({})).unwrap();
        let mut surface = RecordingSurface::new();
        s.tick(0.0, &mut surface).unwrap();
        let base = s.renders();

        assert!(s.book_redraw());
        assert!(!s.book_redraw());
        assert!(!s.book_redraw());
        let report = s.tick(0.0, &mut surface).unwrap();
        assert!(report.rendered);
        assert_eq!(s.renders(), base + 1);

        let report = s.tick(0.0, &mut surface).unwrap();
        assert!(!report.rendered);
        assert_eq!(surface.passes as u64, base + 1);

        // many property writes in one tick still render once
        s.node(a).unwrap().events().frame.listen(move |s, _| {
            s.configure(a, &json!({"x": 1, "y": 2, "alpha": 0.5}))?;
            s.set(a, "width", json!(30))?;
            Ok(Reply::Unset)
        });
        let renders = Rc::new(Cell::new(0));
        let r = renders.clone();
        s.on_render().listen(move |_, _| {
            r.set(r.get() + 1);
            Ok(Reply::Unset)
        });
        s.tick(0.0, &mut surface).unwrap();
        assert_eq!(renders.get(), 1);
        assert_eq!(s.renders(), base + 2);
        assert!(!s.redraw_booked());
    }

    #[test]
    fn test_frame_failure_is_isolated_per_pane() {
        let mut s = scene();
        let a = s
            .create_pane("a", &json!({"children": {"c": {"type": "Component"}, "d": {"type": "Component"}}}))
            .unwrap();
        let b = s
            .create_pane("b", &json!({"children": {"c": {"type": "Component"}}}))
            .unwrap();

        let broken = s.child(a, "c").unwrap();
        s.node(broken).unwrap().events().frame.listen(|_, _| {
            Err(anyhow::anyhow!("boom").into())
        });
        let counts = Rc::new(RefCell::new(Vec::new()));
        for id in [s.child(a, "d").unwrap(), s.child(b, "c").unwrap()] {
            let counts = counts.clone();
            s.node(id).unwrap().events().frame.listen(move |s, t| {
                counts.borrow_mut().push((s.full_path(id)?, t.frame));
                Ok(Reply::Unset)
            });
        }

        let mut surface = RecordingSurface::new();
        let report = s.tick(0.016, &mut surface).unwrap();
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].pane.as_deref(), Some("a"));
        assert_eq!(report.failures[0].error.to_string(), "boom");
        // the rest of pane `a` is skipped, pane `b` still ticks
        assert_eq!(*counts.borrow(), vec![("b:/c".to_string(), 1)]);
    }

    fn sample_tree(s: &mut Scene) -> NodeId {
        s.create_pane(
            "p",
            &json!({"children": {
                "g1": {"type": "Group", "x": 10, "y": 20, "width": 100, "height": 50, "children": {
                    "x": {"type": "Component", "x": 1, "y": 2, "width": 5, "height": 5},
                    "y": {"type": "Component", "visible": false}
                }},
                "g2": {"type": "Component", "width": 1, "height": 1, "alpha": 0.5}
            }}),
        )
        .unwrap()
    }

    #[test]
    fn test_frames_run_parent_before_children() {
        let mut s = scene();
        let p = sample_tree(&mut s);
        let order = Rc::new(RefCell::new(Vec::new()));
        for id in pre_order(&s, p) {
            let order = order.clone();
            s.node(id).unwrap().events().frame.listen(move |s, _| {
                order.borrow_mut().push(s.full_path(id)?);
                Ok(Reply::Unset)
            });
        }
        s.tick(0.0, &mut RecordingSurface::new()).unwrap();

        insta::assert_snapshot!(order.borrow().join("\n"), @r"
        p:
        p:/g1
        p:/g1/x
        p:/g1/y
        p:/g2
        ");
    }

    #[test]
    fn test_render_pass_draw_calls() {
        let mut s = scene();
        sample_tree(&mut s);
        let mut surface = RecordingSurface::new();
        s.tick(0.0, &mut surface).unwrap();

        insta::assert_snapshot!(surface.summary(), @r"
        p: Pane 0,0 1280x800 a=1
        p:/g1 Group 10,20 100x50 a=1
        p:/g1/x Component 11,22 5x5 a=1
        p:/g2 Component 0,0 1x1 a=0.5
        ");
    }

    #[test]
    fn test_render_failure_is_fatal() {
        let mut s = scene();
        s.create_pane("a", &json!({})).unwrap();
        s.book_redraw();
        let mut failing =
            |_: &DrawCall| -> anyhow::Result<()> { Err(anyhow::anyhow!("surface lost")) };
        let err = s.tick(0.0, &mut failing).unwrap_err();
        assert!(matches!(err, Error::Render(_)));
    }

    #[test]
    fn test_deletion_during_for_each_is_deferred() {
        let mut s = scene();
        let a = s.create_pane("a", &json!({})).unwrap();
        let g = s.create_child(a, "g", &json!({"type": "Group"})).unwrap();
        s.populate(g, &json!({"type": "Component"}), 4).unwrap();

        let mut visited = Vec::new();
        s.for_each(g, |s, c| {
            let name = s.node(c)?.name().to_string();
            if name == "1" {
                let next = s.child(g, "2").unwrap();
                s.delete(next)?;
                s.delete(c)?;
                // tombstoned, not yet reaped
                assert!(s.get(c).is_some());
                assert!(s.node(next)?.is_deleted());
            }
            visited.push(name);
            Ok(())
        })
        .unwrap();

        assert_eq!(visited, vec!["0", "1", "3"]);
        assert_eq!(names(&s, &s.children(g)), vec!["0", "3"]);
        assert_eq!(s.group_state(g).unwrap().order.len(), 2);
    }

    #[test]
    fn test_deleted_child_misses_the_rest_of_the_tick() {
        let mut s = scene();
        let a = s.create_pane("a", &json!({"children": {"c": {"type": "Component"}}})).unwrap();
        let c = s.child(a, "c").unwrap();
        let child_frames = Rc::new(Cell::new(0));
        let f = child_frames.clone();
        s.node(c).unwrap().events().frame.listen(move |_, _| {
            f.set(f.get() + 1);
            Ok(Reply::Unset)
        });
        s.node(a).unwrap().events().frame.listen(move |s, _| {
            s.set(c, "deleted", json!(true))?;
            Ok(Reply::Unset)
        });

        let mut surface = RecordingSurface::new();
        s.tick(0.0, &mut surface).unwrap();
        assert_eq!(child_frames.get(), 0);
        assert!(s.get(c).is_none());
        assert_eq!(surface.calls.len(), 1);
    }

    #[test]
    fn test_removing_focused_child_clears_focus() {
        let mut s = scene();
        let a = s.create_pane("a", &json!({})).unwrap();
        let g = s
            .create_child(
                a,
                "g",
                &json!({"type": "Group", "children": {"a": {"type": "Component"}, "b": {"type": "Component"}}}),
            )
            .unwrap();

        assert!(s.focus(g, "b").unwrap());
        let b = s.child(g, "b").unwrap();
        assert_eq!(s.focused_child(g), Some(b));

        s.delete(b).unwrap();
        assert_eq!(s.focused_child(g), None);
        assert_eq!(s.group_state(g).unwrap().focus, None);
        assert_eq!(s.prop(g, "focus").unwrap(), Value::Null);

        assert!(s.focus(g, "a").unwrap());
        let err = s.focus(g, "zzz").unwrap_err();
        assert!(matches!(err, Error::PathNotFound { ref path, .. } if path == "a:/g/zzz"));
        assert_eq!(s.focused_child(g), s.child(g, "a"));
    }

    #[test]
    fn test_focus_before_children_in_one_batch() {
        let mut s = scene();
        let p = s
            .create_pane(
                "p",
                &json!({"focus": "b", "children": {"a": {"type": "Component"}, "b": {"type": "Component"}}}),
            )
            .unwrap();
        assert_eq!(s.prop(p, "focus").unwrap(), json!("b"));
    }

    #[test]
    fn test_unregistered_type_leaves_no_partial_node() {
        let mut s = scene();
        let a = s.create_pane("a", &json!({})).unwrap();
        let before = s.nodes.len();

        let err = s
            .configure(
                a,
                &json!({"children": {
                    "ok": {"type": "Component"},
                    "bad": {"type": "Group", "children": {"inner": {"type": "Nope"}}}
                }}),
            )
            .unwrap_err();
        assert!(matches!(err, Error::TypeNotRegistered { ref tag, .. } if tag == "Nope"));
        assert!(err.is_configuration());
        assert!(s.child(a, "bad").is_none());
        assert!(s.child(a, "ok").is_some());
        assert_eq!(s.nodes.len(), before + 1);
    }

    #[test]
    fn test_missing_type_only_for_new_children() {
        let mut s = scene();
        let a = s
            .create_pane("a", &json!({"children": {"c": {"type": "Component"}}}))
            .unwrap();
        s.configure(a, &json!({"children": {"c": {"width": 3}}})).unwrap();
        assert_eq!(s.node(s.child(a, "c").unwrap()).unwrap().rect().w, 3.0);

        let err = s
            .configure(a, &json!({"children": {"d": {"width": 3}}}))
            .unwrap_err();
        assert!(matches!(err, Error::MissingType { ref name } if name == "d"));
    }

    fn cyclic_ctor(s: &mut Scene, id: NodeId) -> Result<()> {
        install_component(s, id)?;
        s.map_property(id, "a", Accessor::write_only(|_, _| Ok(())), &["b"])?;
        s.map_property(id, "b", Accessor::write_only(|_, _| Ok(())), &["a"])
    }

    #[test]
    fn test_dependency_cycle_aborts_construction() {
        let mut s = scene();
        register_type("TestCyclic", cyclic_ctor).unwrap();
        let a = s.create_pane("a", &json!({})).unwrap();
        let before = s.nodes.len();
        let err = s
            .create_child(a, "c", &json!({"type": "TestCyclic"}))
            .unwrap_err();
        assert!(matches!(err, Error::DependencyCycle { .. }));
        assert!(s.child(a, "c").is_none());
        assert_eq!(s.nodes.len(), before);
    }

    fn counter_ctor(s: &mut Scene, id: NodeId) -> Result<()> {
        install_component(s, id)?;
        s.map_property(
            id,
            "count",
            Accessor::new(
                move |s: &Scene| Ok(s.node(id)?.paint().get("count").cloned().unwrap_or(json!(0))),
                move |s: &mut Scene, v| {
                    s.node_mut(id)?.paint.insert("count".into(), v);
                    Ok(())
                },
            ),
            &["label"],
        )?;
        s.map_property(
            id,
            "label",
            Accessor::new(
                move |s: &Scene| {
                    let label = s.node(id)?.paint().get("label").cloned();
                    Ok(label.unwrap_or(Value::Null))
                },
                |_, _| Ok(()),
            )
            .with_recompute(move |s: &mut Scene| {
                let n = s.prop(id, "count")?;
                s.node_mut(id)?.paint.insert("label".into(), json!(format!("n={n}")));
                Ok(())
            }),
            &[],
        )
    }

    #[test]
    fn test_custom_type_recomputes_dependents() {
        let mut s = scene();
        register_type("TestCounter", counter_ctor).unwrap();
        let a = s.create_pane("a", &json!({})).unwrap();
        let c = s
            .create_child(a, "c", &json!({"type": "TestCounter", "count": 3}))
            .unwrap();
        assert_eq!(s.prop(c, "label").unwrap(), json!("n=3"));
        s.set(c, "count", json!(4)).unwrap();
        assert_eq!(s.prop(c, "label").unwrap(), json!("n=4"));
    }

    #[test]
    fn test_registry_rejects_conflicting_constructor() {
        initialize().unwrap();
        initialize().unwrap();
        let err = register_type("Component", counter_ctor).unwrap_err();
        assert!(matches!(err, Error::DuplicateRegistration { .. }));
        assert!(registry::is_type_registered("Pane"));
        assert!(registry::is_extra_registered("Die"));
    }

    #[test]
    fn test_bundle_lists_readable_properties() {
        let mut s = scene();
        let a = s.create_pane("a", &json!({})).unwrap();
        let c = s
            .create_child(a, "c", &json!({"type": "Component", "x": 3, "rightFlow": "d"}))
            .unwrap();
        let bundle = s.bundle(c).unwrap();
        assert_eq!(bundle["name"], json!("c"));
        assert_eq!(bundle["type"], json!("Component"));
        assert_eq!(bundle["x"], json!(3.0));
        assert_eq!(bundle["rightFlow"], json!("d"));
        assert_eq!(bundle["leftFlow"], Value::Null);
        assert!(!bundle.contains_key("extras"));

        let err = s.set(c, "name", json!("renamed")).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        let err = s.set(c, "nope", json!(1)).unwrap_err();
        assert!(matches!(err, Error::PropertyMissing { .. }));
    }

    #[test]
    fn test_flow_moves_focus_between_sibling_groups() {
        let mut s = scene();
        let p = s
            .create_pane(
                "p",
                &json!({
                    "children": {
                        "left": {"type": "Group", "rightFlow": "right",
                                 "children": {"a": {"type": "Component"}}, "focus": "a"},
                        "right": {"type": "Group", "leftFlow": "left",
                                  "children": {"b": {"type": "Component"}}, "focus": "b"}
                    },
                    "focus": "left",
                    "active": true
                }),
            )
            .unwrap();
        let left = s.child(p, "left").unwrap();
        let right = s.child(p, "right").unwrap();
        let b = s.resolve("p:/right/b").unwrap();

        assert!(!s.press_dir(Dir::Right).unwrap());
        assert_eq!(s.focused_child(p), Some(right));
        assert!(s.node(b).unwrap().is_active());
        assert!(!s.node(left).unwrap().is_active());

        // a vetoing dir_press keeps focus where it is
        s.node(right).unwrap().events().dir_press.listen(|_, d| Ok((*d != Dir::Left).into()));
        assert!(!s.press_dir(Dir::Left).unwrap());
        assert_eq!(s.focused_child(p), Some(right));

        // no flow link: the press bubbles out of the pane
        assert!(s.press_dir(Dir::Up).unwrap());
    }

    #[test]
    fn test_locked_focus_refuses_to_move() {
        let mut s = scene();
        let p = s
            .create_pane(
                "p",
                &json!({"children": {"a": {"type": "Component", "locked": true}, "b": {"type": "Component"}}, "focus": "a"}),
            )
            .unwrap();
        assert!(!s.focus(p, "b").unwrap());
        assert_eq!(s.prop(p, "focus").unwrap(), json!("a"));
    }

    #[test]
    fn test_action_bubbles_from_deepest_focus() {
        let mut s = scene();
        let p = s
            .create_pane(
                "p",
                &json!({"children": {"g": {"type": "Group", "children": {"c": {"type": "Component"}}, "focus": "c"}},
                        "focus": "g", "active": true}),
            )
            .unwrap();
        let c = s.resolve("p:/g/c").unwrap();
        let g = s.child(p, "g").unwrap();
        let order = Rc::new(RefCell::new(Vec::new()));
        for (id, bubble) in [(c, true), (g, false), (p, true)] {
            let order = order.clone();
            s.node(id).unwrap().events().action.listen(move |s, _| {
                order.borrow_mut().push(s.full_path(id)?);
                Ok(bubble.into())
            });
        }
        assert!(!s.press_action(json!({"key": "enter"})).unwrap());
        assert_eq!(*order.borrow(), vec!["p:/g/c", "p:/g"]);
    }

    #[test]
    fn test_fade_then_die() {
        let mut s = scene();
        let a = s.create_pane("a", &json!({})).unwrap();
        let c = s
            .create_child(
                a,
                "c",
                &json!({"type": "Component", "extras": {
                    "die": {"type": "Die"},
                    "fade": {"type": "Fade", "from": 0, "to": 1, "duration": 4, "on": true, "then": "die"}
                }}),
            )
            .unwrap();
        assert_eq!(s.node(c).unwrap().alpha(), 0.0);

        let mut surface = RecordingSurface::new();
        s.tick(0.0, &mut surface).unwrap();
        assert_eq!(s.node(c).unwrap().alpha(), 0.25);
        s.tick(0.0, &mut surface).unwrap();
        assert_eq!(s.node(c).unwrap().alpha(), 0.5);
        s.tick(0.0, &mut surface).unwrap();
        assert!(s.is_live(c));
        s.tick(0.0, &mut surface).unwrap();
        assert!(s.get(c).is_none());
        assert!(s.children(a).is_empty());
    }

    #[test]
    fn test_effect_delay_and_continuation() {
        let mut s = scene();
        let a = s.create_pane("a", &json!({})).unwrap();
        let fx = s
            .attach(a, "fx", "Effect", &json!({"delay": 2, "duration": 1, "on": true}))
            .unwrap();
        assert_eq!(
            s.effect(fx).unwrap().phase(),
            EffectPhase::Delayed { remaining: 2 }
        );
        let ended_at = Rc::new(RefCell::new(Vec::new()));
        let e = ended_at.clone();
        s.then_call(fx, move |s, _| {
            e.borrow_mut().push(s.frame());
            Ok(())
        })
        .unwrap();

        let mut surface = RecordingSurface::new();
        s.tick(0.0, &mut surface).unwrap();
        s.tick(0.0, &mut surface).unwrap();
        assert_eq!(
            s.effect(fx).unwrap().phase(),
            EffectPhase::Running { elapsed: 0 }
        );
        s.tick(0.0, &mut surface).unwrap();
        assert_eq!(*ended_at.borrow(), vec![3]);
        assert!(s.extra(a, "fx").is_none());
    }

    #[test]
    fn test_continuation_skips_deleted_owner() {
        let mut s = scene();
        let a = s.create_pane("a", &json!({})).unwrap();
        let c = s.create_child(a, "c", &json!({"type": "Component"})).unwrap();
        s.node(c).unwrap().events().frame.listen(move |s, _| {
            s.delete(c)?;
            Ok(Reply::Unset)
        });
        let fx = s
            .attach(c, "fx", "Effect", &json!({"duration": 1, "on": true, "noDelete": true}))
            .unwrap();
        let ran = Rc::new(Cell::new(false));
        let r = ran.clone();
        s.then_call(fx, move |_, _| {
            r.set(true);
            Ok(())
        })
        .unwrap();

        s.tick(0.0, &mut RecordingSurface::new()).unwrap();
        assert!(!ran.get());
        assert!(s.get(c).is_none());
    }

    #[test]
    fn test_slide_moves_owner() {
        let mut s = scene();
        let a = s.create_pane("a", &json!({})).unwrap();
        let c = s
            .create_child(a, "c", &json!({"type": "Component", "x": 4, "y": 5}))
            .unwrap();
        let fx = s
            .attach(c, "move", "Slide", &json!({"by": 10, "dir": "down", "duration": 2, "on": true, "noDelete": true}))
            .unwrap();

        let mut surface = RecordingSurface::new();
        s.tick(0.0, &mut surface).unwrap();
        assert_eq!(s.node(c).unwrap().rect().y, 10.0);
        s.tick(0.0, &mut surface).unwrap();
        assert_eq!(s.node(c).unwrap().rect().y, 15.0);
        assert_eq!(s.node(c).unwrap().rect().x, 4.0);
        assert_eq!(s.effect(fx).unwrap().phase(), EffectPhase::Ended);
    }

    #[test]
    fn test_frame_ticker_deltas() {
        let mut ticker = FrameTicker::new().with_max_dt(0.1);
        assert_eq!(ticker.next_dt(), 0.0);
        let dt = ticker.next_dt();
        assert!((0.0..=0.1).contains(&dt));

        let mut s = scene();
        s.create_pane("a", &json!({})).unwrap();
        let report = ticker.pump(&mut s, &mut RecordingSurface::new()).unwrap();
        assert_eq!(report.frame, 1);
        assert!(report.is_clean());
    }

    #[test]
    fn test_failed_pane_keeps_previous_active_pane() {
        let mut s = scene();
        let a = s.create_pane("a", &json!({"active": true})).unwrap();

        let err = s
            .create_pane("b", &json!({"active": true, "bogus": 1}))
            .unwrap_err();
        assert!(matches!(err, Error::PropertyMissing { ref name, .. } if name == "bogus"));
        assert!(s.get_pane("b").is_none());
        assert_eq!(s.panes().collect::<Vec<_>>(), ["a"]);
        assert_eq!(s.active_pane().unwrap(), Some(a));
        assert!(s.node(a).unwrap().is_active());
    }

    #[test]
    fn test_deleted_pane_cannot_be_activated() {
        let mut s = scene();
        let a = s.create_pane("a", &json!({"active": true})).unwrap();
        let b = s.create_pane("b", &json!({})).unwrap();

        let refused = Rc::new(Cell::new(None));
        let r = refused.clone();
        s.node(a).unwrap().events().frame.listen(move |s, _| {
            s.delete(b)?;
            r.set(Some(matches!(s.activate(b), Err(Error::StaleNode(_)))));
            Ok(Reply::Unset)
        });

        let report = s.tick(0.0, &mut RecordingSurface::new()).unwrap();
        assert!(report.is_clean());
        assert_eq!(refused.get(), Some(true));
        assert_eq!(s.active_pane().unwrap(), Some(a));
        assert!(s.get(b).is_none());
    }

    #[test]
    fn test_failed_rebuild_keeps_existing_child() {
        let mut s = scene();
        let p = s
            .create_pane(
                "p",
                &json!({"focus": "c", "children": {
                    "b": {"type": "Component"},
                    "c": {"type": "Component", "x": 7},
                    "d": {"type": "Component"}
                }}),
            )
            .unwrap();
        let c = s.child(p, "c").unwrap();

        let err = s
            .configure(p, &json!({"children": {"c": {"type": "Group", "bogus": 1}}}))
            .unwrap_err();
        assert!(matches!(err, Error::PropertyMissing { ref name, .. } if name == "bogus"));
        assert_eq!(s.child(p, "c"), Some(c));
        assert_eq!(s.node(c).unwrap().rect().x, 7.0);
        assert_eq!(s.focused_child(p), Some(c));

        // a rebuild that succeeds takes the old child's place and focus
        let g = s.create_child(p, "c", &json!({"type": "Group"})).unwrap();
        assert!(s.get(c).is_none());
        assert_eq!(names(&s, &s.children(p)), ["b", "c", "d"]);
        assert_eq!(s.children(p)[1], g);
        assert_eq!(s.draw_order(p)[1], g);
        assert_eq!(s.focused_child(p), Some(g));
    }

    #[test]
    fn test_failed_populate_rebuild_keeps_children() {
        let mut s = scene();
        let a = s.create_pane("a", &json!({})).unwrap();
        let g = s.create_child(a, "list", &json!({"type": "Group"})).unwrap();
        s.populate(g, &json!({"type": "Component"}), 2).unwrap();
        let before = s.children(g);

        let err = s
            .populate(g, &json!({"type": "Group", "bogus": 1}), 2)
            .unwrap_err();
        assert!(matches!(err, Error::PropertyMissing { .. }));
        assert_eq!(s.children(g), before);
        assert!(before.iter().all(|&c| !s.node(c).unwrap().is_group()));
    }

    #[test]
    fn test_child_layers_set_draw_order() {
        let mut s = scene();
        let p = s
            .create_pane(
                "p",
                &json!({"children": {
                    "a": {"type": "Component"},
                    "b": {"type": "Component"},
                    "c": {"type": "Component", "layer": "-"}
                }}),
            )
            .unwrap();
        let layers = |s: &Scene| names(s, &s.draw_order(p));
        assert_eq!(layers(&s), ["c", "a", "b"]);

        s.alter_child_layer(p, "c", "+a").unwrap();
        assert_eq!(layers(&s), ["a", "c", "b"]);
        s.alter_child_layer(p, "a", "+").unwrap();
        assert_eq!(layers(&s), ["c", "b", "a"]);
        let b = s.child(p, "b").unwrap();
        s.set(b, "layer", json!("-c")).unwrap();
        assert_eq!(layers(&s), ["b", "c", "a"]);
        assert_eq!(names(&s, &s.children(p)), ["a", "b", "c"]);

        assert!(matches!(
            s.alter_child_layer(p, "a", "^").unwrap_err(),
            Error::PropertyValue { .. }
        ));
        assert!(matches!(
            s.alter_child_layer(p, "a", "+zz").unwrap_err(),
            Error::PathNotFound { ref segment, .. } if segment == "zz"
        ));
        assert_eq!(layers(&s), ["b", "c", "a"]);

        let mut surface = RecordingSurface::new();
        s.book_redraw();
        s.tick(0.0, &mut surface).unwrap();
        let paths: Vec<&str> = surface.calls.iter().map(|c| c.path.as_str()).collect();
        assert_eq!(paths, ["p:", "p:/b", "p:/c", "p:/a"]);
    }

    #[test]
    fn test_focus_all_reaches_every_child() {
        let mut s = scene();
        let p = s
            .create_pane(
                "p",
                &json!({
                    "focus": "pad",
                    "children": {"pad": {
                        "type": "Group",
                        "focusBehaviour": "all",
                        "focus": "a",
                        "children": {"a": {"type": "Component"}, "b": {"type": "Component"}}
                    }},
                    "active": true
                }),
            )
            .unwrap();
        let pad = s.resolve("p:/pad").unwrap();
        let (a, b) = (s.child(pad, "a").unwrap(), s.child(pad, "b").unwrap());
        assert_eq!(s.focus_chain(p), vec![p, pad, a, b]);
        for c in [a, b] {
            assert!(s.node(c).unwrap().is_focused());
            assert!(s.node(c).unwrap().is_active());
        }
        let late = s.create_child(pad, "late", &json!({"type": "Component"})).unwrap();
        assert!(s.node(late).unwrap().is_active());

        let hits = Rc::new(RefCell::new(Vec::new()));
        for (id, veto) in [(a, false), (b, true), (pad, false)] {
            let hits = hits.clone();
            s.node(id).unwrap().events().action.listen(move |s, _| {
                hits.borrow_mut().push(s.node(id)?.name().to_string());
                Ok((!veto).into())
            });
        }
        assert!(!s.press_action(json!({"key": "enter"})).unwrap());
        assert_eq!(*hits.borrow(), ["a", "b"]);

        let lost = Rc::new(Cell::new(0));
        let l = lost.clone();
        s.node(b).unwrap().events().focus_change.listen(move |_, on| {
            if !*on {
                l.set(l.get() + 1);
            }
            Ok(Reply::Unset)
        });
        s.set(pad, "focusBehaviour", json!("one")).unwrap();
        assert_eq!(lost.get(), 1);
        assert!(s.node(a).unwrap().is_active());
        assert!(!s.node(b).unwrap().is_focused());
        assert!(!s.node(late).unwrap().is_active());
        assert_eq!(s.focus_chain(p), vec![p, pad, a]);
        assert_eq!(s.prop(pad, "focusBehaviour").unwrap(), json!("one"));
    }

    #[test]
    fn test_focus_visible_shows_only_the_focused_child() {
        let mut s = scene();
        let p = s
            .create_pane(
                "p",
                &json!({
                    "focusVisible": true,
                    "focus": "a",
                    "children": {"a": {"type": "Component"}, "b": {"type": "Component"}}
                }),
            )
            .unwrap();
        let (a, b) = (s.child(p, "a").unwrap(), s.child(p, "b").unwrap());
        assert!(s.node(a).unwrap().is_visible());
        assert!(!s.node(b).unwrap().is_visible());

        assert!(s.focus(p, "b").unwrap());
        assert!(!s.node(a).unwrap().is_visible());
        assert!(s.node(b).unwrap().is_visible());
    }

    #[test]
    fn test_fit_and_fill_sizes() {
        let mut s = scene();
        s.create_pane(
            "p",
            &json!({"children": {"box": {
                "type": "Group", "x": 5, "width": -1, "height": -2,
                "children": {
                    "a": {"type": "Component", "x": 10, "width": 30, "height": 5},
                    "b": {"type": "Component", "x": 50, "width": 20, "height": -2},
                    "fill": {"type": "Component", "width": -2, "height": 8}
                }
            }}}),
        )
        .unwrap();
        let g = s.resolve("p:/box").unwrap();
        assert_eq!(s.bounds(g).unwrap(), Rect::new(5.0, 0.0, 70.0, 800.0));

        let fill = s.resolve("p:/box/fill").unwrap();
        assert_eq!(s.prop(fill, "width").unwrap(), json!(70.0));
        assert_eq!(s.node(fill).unwrap().rect().w, FILL_PARENT);
        let b = s.resolve("p:/box/b").unwrap();
        assert_eq!(s.bounds(b).unwrap().h, 800.0);
    }
}
