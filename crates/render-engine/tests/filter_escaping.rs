use overlaycut_project_model::{Caption, Overlay, OverlaySet, PlacementResolver};
use overlaycut_render_engine::filter_graph::{
    ensure_escaped, escape_filter_text, escape_filter_value, unescape_filter_text,
    FilterGraphBuilder, GraphSpec, RESERVED_CHARS,
};
use proptest::prelude::*;

fn text_with_reserved() -> impl Strategy<Value = String> {
    let reserved: Vec<char> = RESERVED_CHARS.to_vec();
    prop::collection::vec(
        prop_oneof![
            prop::sample::select(reserved),
            prop::char::range('a', 'z'),
            Just(' '),
            Just('é'),
        ],
        0..40,
    )
    .prop_map(|chars| chars.into_iter().collect())
}

proptest! {
    #[test]
    fn unescape_inverts_escape(raw in text_with_reserved()) {
        prop_assert_eq!(unescape_filter_text(&escape_filter_text(&raw)), raw);
    }

    #[test]
    fn escaped_text_passes_validation(raw in text_with_reserved()) {
        prop_assert!(ensure_escaped(&escape_filter_text(&raw)).is_ok());
        prop_assert!(ensure_escaped(&escape_filter_value(&raw)).is_ok());
    }

    #[test]
    fn double_escaped_value_survives_two_unescape_passes(raw in text_with_reserved()) {
        let once = unescape_filter_text(&escape_filter_value(&raw));
        prop_assert_eq!(unescape_filter_text(&once), raw);
    }

    #[test]
    fn any_caption_text_compiles(raw in text_with_reserved(), start in 0.0f64..9.0) {
        let builder = FilterGraphBuilder::new(GraphSpec {
            width: 1280,
            height: 720,
            fps: 30,
            duration_secs: 10.0,
            resolver: PlacementResolver::default(),
            font_file: None,
        });
        let overlays = OverlaySet::from_overlays(&[Overlay::Caption(Caption::new(raw, start, 1.0))]);
        let graph = builder.build(&overlays).unwrap();
        prop_assert_eq!(graph.caption_ops, 1);
        prop_assert!(graph.filter.ends_with("[vout]"));
    }
}
