//! Frame graph integration tests.
//!
//! Every test compiles a scheme against the [`DummyDevice`], which records
//! each command instead of executing it, and checks the recorded stream.
//!
//! ```bash
//! cargo test --test frame_graph_tests
//! ```

use std::sync::Arc;

use parking_lot::Mutex;
use rstest::rstest;

use framegraph::*;

// ============================================================================
// Helpers
// ============================================================================

fn device() -> Arc<DummyDevice> {
    let _ = env_logger::builder().is_test(true).try_init();
    Arc::new(DummyDevice::new(Extent2d::new(320, 240)))
}

fn color() -> ResourceDesc {
    ResourceDesc::new(TextureFormat::Rgba8Unorm)
}

/// Pass that writes `slot` in place and hands it on.
fn in_place<S>(slot: &str) -> PassDesc<S> {
    PassDesc::new()
        .with_drain(Drain::color(slot))
        .with_source(Source::new(slot))
}

/// Resource "Color"; pass "P" draining and sourcing "Color"; P feeds the swapchain.
fn scenario_a<S>() -> FrameGraphScheme<S> {
    let mut scheme = FrameGraphScheme::new();
    scheme
        .add_resource("Color", color().with_relative_size(1.0, 1.0))
        .add_pass("P", in_place("Color"))
        .add_link("$.Color", "P.Color")
        .add_link("P.Color", "$.BLIT_TO_SWAPCHAIN");
    scheme
}

/// Pass "A" writes "Buf"; pass "B" reads it without handing it on.
fn scenario_b() -> FrameGraphScheme<()> {
    let mut scheme = FrameGraphScheme::new();
    scheme
        .add_resource("Buf", color())
        .add_resource("Out", color())
        .add_pass("A", in_place("Buf"))
        .add_pass(
            "B",
            PassDesc::new()
                .with_drain(Drain::input("Buf"))
                .with_drain(Drain::color("Out"))
                .with_source(Source::new("Out")),
        )
        .add_link("$.Buf", "A.Buf")
        .add_link("A.Buf", "B.Buf")
        .add_link("$.Out", "B.Out")
        .add_link("B.Out", "$.BLIT_TO_SWAPCHAIN");
    scheme
}

fn count(device: &DummyDevice, predicate: impl Fn(&RecordedCommand) -> bool) -> usize {
    device.count_commands(predicate)
}

// ============================================================================
// Scenarios
// ============================================================================

#[rstest]
#[case::small(Extent2d::new(1, 1))]
#[case::hd(Extent2d::new(1280, 720))]
fn test_scenario_a_single_pass(#[case] extent: Extent2d) {
    let device = Arc::new(DummyDevice::new(extent));

    let layout = scenario_a::<()>().validate().unwrap();
    assert_eq!(
        layout.resource("Color").unwrap().usage,
        ImageUsage::COLOR_ATTACHMENT | ImageUsage::TRANSFER_SRC
    );

    let mut graph = scenario_a::<()>().compile(device.clone()).unwrap();
    assert_eq!(graph.resource_extent("Color"), Some(extent));

    graph.execute(&()).unwrap();

    assert_eq!(count(&device, |c| matches!(c, RecordedCommand::BeginRenderPass { .. })), 1);
    assert_eq!(count(&device, |c| matches!(c, RecordedCommand::EndRenderPass(_))), 1);
    assert_eq!(count(&device, |c| matches!(c, RecordedCommand::BlitImage { .. })), 1);
    assert_eq!(count(&device, |c| matches!(c, RecordedCommand::Present { .. })), 1);
}

#[test]
fn test_scenario_b_store_ops_and_usage() {
    let device = device();
    let graph = scenario_b().compile(device.clone()).unwrap();

    // Usage stops at B: never blitted, so no transfer source
    assert_eq!(
        graph.resource_usage("Buf"),
        Some(ImageUsage::COLOR_ATTACHMENT | ImageUsage::INPUT_ATTACHMENT)
    );
    assert_eq!(
        graph.resource_usage("Out"),
        Some(ImageUsage::COLOR_ATTACHMENT | ImageUsage::TRANSFER_SRC)
    );

    let store_ops = |pass: &str| {
        let render_pass = graph.render_pass_object(pass).unwrap();
        let handle = graph.resolve_render_pass(&render_pass).unwrap();
        device
            .render_pass_descriptor(handle)
            .unwrap()
            .attachments
            .iter()
            .map(|a| a.store_op)
            .collect::<Vec<_>>()
    };
    assert_eq!(store_ops("A"), vec![StoreOp::Store]);
    assert_eq!(store_ops("B"), vec![StoreOp::Discard, StoreOp::Store]);
}

#[test]
fn test_scenario_b_resolves_to_shared_image() {
    let device = device();
    let mut graph = scenario_b().compile(device.clone()).unwrap();
    let buf = graph.resource_image("Buf").unwrap();

    graph.execute(&()).unwrap();

    let targets: Vec<RenderTargetDescriptor> = device
        .commands()
        .iter()
        .filter_map(|c| match c {
            RecordedCommand::BeginRenderPass { render_target, .. } => {
                device.render_target_descriptor(*render_target)
            }
            _ => None,
        })
        .collect();
    assert_eq!(targets.len(), 2);
    assert_eq!(targets[0].attachments, vec![buf]);
    assert_eq!(targets[1].attachments[0], buf);
    assert_eq!(
        graph.current_layout("Buf"),
        Some(ImageLayout::ShaderReadOnly)
    );
}

// ============================================================================
// Execution
// ============================================================================

struct FrameScene {
    frame: u32,
}

#[rstest]
#[case::one_frame(1)]
#[case::three_frames(3)]
fn test_callbacks_run_once_per_frame_in_order(#[case] frames: u32) {
    let device = device();
    let log: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

    let recorder = |name: &'static str| {
        let log = Arc::clone(&log);
        move |ctx: &mut PassContext<'_>, scene: &FrameScene| {
            assert_eq!(ctx.pass_name, name);
            log.lock().push(format!("{}:{}", scene.frame, name));
        }
    };

    let mut scheme = FrameGraphScheme::new();
    scheme
        .add_resource("Color", color())
        .add_pass("First", in_place::<FrameScene>("Color").with_record(recorder("First")))
        .add_pass("Second", in_place::<FrameScene>("Color").with_record(recorder("Second")))
        .add_pass("Third", in_place::<FrameScene>("Color").with_record(recorder("Third")))
        .add_link("$.Color", "First.Color")
        .add_link("First.Color", "Second.Color")
        .add_link("Second.Color", "Third.Color")
        .add_link("Third.Color", "$.BLIT_TO_SWAPCHAIN");
    let mut graph = scheme.compile(device.clone()).unwrap();

    for frame in 0..frames {
        graph.execute(&FrameScene { frame }).unwrap();
    }

    let expected: Vec<String> = (0..frames)
        .flat_map(|frame| {
            ["First", "Second", "Third"]
                .into_iter()
                .map(move |name| format!("{}:{}", frame, name))
        })
        .collect();
    assert_eq!(*log.lock(), expected);
    assert_eq!(graph.frame_index(), frames as u64);
}

#[test]
fn test_pass_context_reaches_concrete_device() {
    let device = device();
    let seen = Arc::new(Mutex::new(None));

    let mut scheme = FrameGraphScheme::<()>::new();
    let seen_in_pass = Arc::clone(&seen);
    scheme
        .add_resource("Color", color().with_relative_size(0.5, 0.5))
        .add_pass(
            "Half",
            in_place("Color").with_record(move |ctx: &mut PassContext<'_>, _: &()| {
                let dummy = ctx.device_as::<DummyDevice>().map(|d| d.name());
                *seen_in_pass.lock() = Some((ctx.extent, dummy));
            }),
        )
        .add_link("$.Color", "Half.Color")
        .add_link("Half.Color", SWAPCHAIN_SINK);
    let mut graph = scheme.compile(device.clone()).unwrap();
    graph.execute(&()).unwrap();

    assert_eq!(
        *seen.lock(),
        Some((Extent2d::new(160, 120), Some("Dummy")))
    );
}

#[rstest]
#[case::linear(Filter::Linear)]
#[case::nearest(Filter::Nearest)]
fn test_blit_uses_configured_filter(#[case] filter: Filter) {
    let device = device();
    let config = FrameGraphConfig::default().with_blit_filter(filter);
    let mut graph = scenario_a::<()>()
        .compile_with_config(device.clone(), config)
        .unwrap();
    graph.execute(&()).unwrap();

    let region = device
        .commands()
        .into_iter()
        .find_map(|c| match c {
            RecordedCommand::BlitImage { region, .. } => Some(region),
            _ => None,
        })
        .unwrap();
    assert_eq!(region.filter, filter);
    assert_eq!(Some(region.src), graph.resource_image("Color"));
    assert_eq!(Some(region.dst), device.swapchain_image(0));
    assert_eq!(region.dst_extent, Extent2d::new(320, 240));
}

#[test]
fn test_swapchain_images_rotate() {
    let device = Arc::new(DummyDevice::with_image_count(Extent2d::new(64, 64), 2));
    let mut graph = scenario_a::<()>().compile(device.clone()).unwrap();

    for _ in 0..3 {
        graph.execute(&()).unwrap();
    }

    let presented: Vec<u32> = device
        .commands()
        .into_iter()
        .filter_map(|c| match c {
            RecordedCommand::Present { index } => Some(index),
            _ => None,
        })
        .collect();
    assert_eq!(presented, vec![0, 1, 0]);
}

#[test]
fn test_resize_and_recompile() {
    let device = device();
    let mut graph = scenario_a::<()>().compile(device.clone()).unwrap();
    graph.execute(&()).unwrap();

    device.set_surface_extent(Extent2d::new(640, 480));
    device.mark_surface_outdated();
    assert_eq!(graph.execute(&()), Err(GraphicsError::SurfaceOutdated));
    assert!(graph.is_outdated());

    drop(graph);
    let mut graph = scenario_a::<()>().compile(device.clone()).unwrap();
    assert!(!graph.is_outdated());
    assert_eq!(graph.resource_extent("Color"), Some(Extent2d::new(640, 480)));
    assert!(graph.execute(&()).is_ok());
}

#[rstest]
#[case::first_pass(0, ImageLayout::Undefined, ImageLayout::Undefined)]
#[case::second_pass(1, ImageLayout::ColorAttachment, ImageLayout::Undefined)]
#[case::blit(2, ImageLayout::ShaderReadOnly, ImageLayout::ColorAttachment)]
fn test_failed_submit_leaves_graph_usable(
    #[case] skip: usize,
    #[case] buf: ImageLayout,
    #[case] out: ImageLayout,
) {
    let device = device();
    let mut graph = scenario_b().compile(device.clone()).unwrap();
    device.fail_submit_after(skip, GraphicsError::DeviceLost);

    assert_eq!(graph.execute(&()), Err(GraphicsError::DeviceLost));
    // Only work that reached the queue moves a layout forward
    assert_eq!(graph.current_layout("Buf"), Some(buf));
    assert_eq!(graph.current_layout("Out"), Some(out));
    assert_eq!(graph.frame_index(), 0);
    // The acquired image is handed back
    assert_eq!(count(&device, |c| matches!(c, RecordedCommand::Present { .. })), 1);

    device.clear_commands();
    graph.execute(&()).unwrap();
    assert_eq!(graph.frame_index(), 1);
    assert_eq!(count(&device, |c| matches!(c, RecordedCommand::BlitImage { .. })), 1);
    assert_eq!(graph.current_layout("Out"), Some(ImageLayout::TransferSrc));
}

// ============================================================================
// Compilation
// ============================================================================

#[test]
fn test_depth_chain_usage() {
    let device = device();
    let mut scheme = FrameGraphScheme::<()>::new();
    scheme
        .add_resource("Color", color())
        .add_resource("Depth", ResourceDesc::new(TextureFormat::Depth32Float))
        .add_pass(
            "Prepass",
            PassDesc::new()
                .with_drain(Drain::depth_stencil("Depth"))
                .with_source(Source::new("Depth")),
        )
        .add_pass(
            "Opaque",
            in_place("Color").with_drain(Drain::depth_stencil("Depth").with_load_op(LoadOp::Load)),
        )
        .add_link("$.Depth", "Prepass.Depth")
        .add_link("Prepass.Depth", "Opaque.Depth")
        .add_link("$.Color", "Opaque.Color")
        .add_link("Opaque.Color", SWAPCHAIN_SINK);

    let mut graph = scheme.compile(device.clone()).unwrap();
    assert_eq!(
        graph.resource_usage("Depth"),
        Some(ImageUsage::DEPTH_STENCIL_ATTACHMENT)
    );

    graph.execute(&()).unwrap();
    assert_eq!(
        graph.current_layout("Depth"),
        Some(ImageLayout::DepthStencilAttachment)
    );
}

#[test]
fn test_compiling_twice_is_deterministic() {
    let device = device();
    let first = scenario_b().compile(device.clone()).unwrap();
    let second = scenario_b().compile(device.clone()).unwrap();

    assert_eq!(
        first.pass_names().collect::<Vec<_>>(),
        second.pass_names().collect::<Vec<_>>()
    );
    assert_eq!(
        first.resource_names().collect::<Vec<_>>(),
        second.resource_names().collect::<Vec<_>>()
    );
    assert_eq!(first.link_count(), second.link_count());
    assert_eq!(first.link_count(), 4);
    assert_ne!(first.generation(), second.generation());
    assert_ne!(first.resource_image("Buf"), second.resource_image("Buf"));
}

#[test]
fn test_render_pass_ref_from_other_graph_is_stale() {
    let device = device();
    let first = scenario_a::<()>().compile(device.clone()).unwrap();
    let second = scenario_a::<()>().compile(device.clone()).unwrap();

    let from_first = first.render_pass_object("P").unwrap();
    assert!(first.resolve_render_pass(&from_first).is_ok());
    assert_eq!(
        second.resolve_render_pass(&from_first),
        Err(GraphError::StaleRenderPass {
            found: first.generation(),
            expected: second.generation(),
        })
    );
}

#[test]
fn test_failed_compile_allocates_nothing() {
    let device = device();
    let mut scheme = FrameGraphScheme::<()>::new();
    scheme
        .add_resource("Color", color())
        .add_pass("P", in_place("Color"))
        .add_link("$.Color", "P.Color");

    assert_eq!(
        scheme.compile(device.clone()).err(),
        Some(Error::Graph(GraphError::MissingSwapchainLink))
    );
    assert_eq!(device.live_object_count(), 0);
}

fn unknown_pass() -> FrameGraphScheme<()> {
    let mut scheme = scenario_a();
    scheme.add_link("$.Color", "Missing.Color");
    scheme
}

fn unknown_resource() -> FrameGraphScheme<()> {
    let mut scheme = FrameGraphScheme::new();
    scheme
        .add_pass("P", in_place("Color"))
        .add_link("$.Nope", "P.Color")
        .add_link("P.Color", SWAPCHAIN_SINK);
    scheme
}

fn unlinked_drain() -> FrameGraphScheme<()> {
    let mut scheme = FrameGraphScheme::new();
    scheme
        .add_resource("Color", color())
        .add_pass(
            "P",
            in_place("Color").with_drain(Drain::depth_stencil("Depth")),
        )
        .add_link("$.Color", "P.Color")
        .add_link("P.Color", SWAPCHAIN_SINK);
    scheme
}

fn source_without_drain() -> FrameGraphScheme<()> {
    let mut scheme = scenario_a();
    scheme.add_pass("Q", PassDesc::new().with_source(Source::new("Ghost")));
    scheme
}

fn root_as_drain() -> FrameGraphScheme<()> {
    let mut scheme = scenario_a();
    scheme.add_link("P.Color", "$.Color");
    scheme
}

fn sink_as_source() -> FrameGraphScheme<()> {
    let mut scheme = FrameGraphScheme::new();
    scheme
        .add_resource("Color", color())
        .add_pass("P", in_place("Color"))
        .add_link(SWAPCHAIN_SINK, "P.Color");
    scheme
}

fn two_depth_drains() -> FrameGraphScheme<()> {
    let mut scheme = FrameGraphScheme::new();
    scheme
        .add_resource("Color", color())
        .add_pass(
            "P",
            in_place("Color")
                .with_drain(Drain::depth_stencil("D0"))
                .with_drain(Drain::depth_stencil("D1")),
        );
    scheme
}

fn depth_to_swapchain() -> FrameGraphScheme<()> {
    let mut scheme = FrameGraphScheme::new();
    scheme
        .add_resource("Depth", ResourceDesc::new(TextureFormat::Depth32Float))
        .add_pass(
            "P",
            PassDesc::new()
                .with_drain(Drain::depth_stencil("Depth"))
                .with_source(Source::new("Depth")),
        )
        .add_link("$.Depth", "P.Depth")
        .add_link("P.Depth", SWAPCHAIN_SINK);
    scheme
}

fn malformed_address() -> FrameGraphScheme<()> {
    let mut scheme = scenario_a();
    scheme.add_link("Color", "P.Other");
    scheme
}

#[rstest]
#[case::unknown_pass(unknown_pass(), GraphError::UnknownPass {
    address: "Missing.Color".into(),
    pass: "Missing".into(),
})]
#[case::unknown_resource(unknown_resource(), GraphError::UnknownResource {
    address: "$.Nope".into(),
    resource: "Nope".into(),
})]
#[case::unlinked_drain(unlinked_drain(), GraphError::UnlinkedDrain {
    pass: "P".into(),
    drain: "Depth".into(),
})]
#[case::source_without_drain(source_without_drain(), GraphError::SourceWithoutDrain {
    pass: "Q".into(),
    source_name: "Ghost".into(),
})]
#[case::root_as_drain(root_as_drain(), GraphError::RootAsDrain("$.Color".into()))]
#[case::sink_as_source(sink_as_source(), GraphError::SinkAsSource)]
#[case::two_depth_drains(two_depth_drains(), GraphError::MultipleDepthAttachments("P".into()))]
#[case::depth_to_swapchain(depth_to_swapchain(), GraphError::DepthSwapchainSource("Depth".into()))]
#[case::malformed_address(malformed_address(), GraphError::MalformedAddress("Color".into()))]
fn test_validation_errors(#[case] scheme: FrameGraphScheme<()>, #[case] expected: GraphError) {
    assert_eq!(scheme.validate(), Err(expected));
}
