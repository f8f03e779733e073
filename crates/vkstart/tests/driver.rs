// SPDX-License-Identifier: CEPL-1.0
//! End-to-end runs against whatever Vulkan driver the machine has.
//!
//! Each test returns early with a note on stderr when there is no loader,
//! no usable device, or no `VK_EXT_headless_surface`. Any other missing
//! extension fails the test.

use vkstart::ash::vk;
use vkstart::{
    AnyGraphicsDevice, Context, ExtensionScope, HeadlessSurface, InitOptions, QueueRole,
    StartupError,
};

const HEADLESS_SURFACE: &str = "VK_EXT_headless_surface";

/// Errors that mean this machine cannot run the scenario at all. A missing
/// extension only counts when it is the headless-surface one; anything else
/// is a real failure.
fn no_usable_driver(e: &StartupError) -> bool {
    match e {
        StartupError::Loader(_)
        | StartupError::NoPhysicalDevice
        | StartupError::NoEligibleDevice
        | StartupError::NativeCreateFailed {
            object: "instance",
            ..
        } => true,
        StartupError::ExtensionMissing { name, .. } => name == HEADLESS_SURFACE,
        _ => false,
    }
}

fn build(options: InitOptions) -> Option<Context> {
    match Context::new(options) {
        Ok(ctx) => Some(ctx),
        Err(e) if no_usable_driver(&e) => {
            eprintln!("skipping: no usable Vulkan driver ({e})");
            None
        }
        Err(e) => panic!("bootstrap failed: {e}"),
    }
}

#[test]
fn only_the_headless_extension_counts_as_missing_driver() {
    let missing = |scope, name: &str| StartupError::ExtensionMissing {
        scope,
        name: name.to_owned(),
    };
    assert!(no_usable_driver(&missing(ExtensionScope::Instance, HEADLESS_SURFACE)));
    assert!(!no_usable_driver(&missing(ExtensionScope::Instance, "VK_KHR_surface")));
    assert!(!no_usable_driver(&missing(ExtensionScope::Device, "VK_KHR_swapchain")));
    assert!(!no_usable_driver(&StartupError::NativeCreateFailed {
        object: "logical device",
        result: vk::Result::ERROR_INITIALIZATION_FAILED,
    }));
    assert!(no_usable_driver(&StartupError::NoPhysicalDevice));
}

#[test]
fn no_surfaces_no_validation() {
    let options = InitOptions::default()
        .with_validation(false)
        .with_device_selection(AnyGraphicsDevice);
    let Some(ctx) = build(options) else { return };

    assert!(!ctx.debug_enabled());
    assert!(ctx.swapchains().next().is_none());
    assert!(ctx.present_queues().is_empty());
    assert!(ctx.swapchain_loader().is_none());
    assert!(ctx.surface_ids().is_empty());

    let graphics = ctx.queue(QueueRole::Graphics).expect("graphics queue");
    assert_ne!(graphics.queue, vk::Queue::null());
    let transfer = ctx.queue(QueueRole::Transfer).expect("transfer queue");
    assert_ne!(transfer.queue, vk::Queue::null());
    assert!(ctx.queue(QueueRole::Present).is_none());

    let info = ctx.physical_device();
    assert_eq!(info.family(QueueRole::Graphics), Some(graphics.family_index));
    ctx.wait_idle().unwrap();
}

#[test]
fn one_headless_surface() {
    let extent = vk::Extent2D {
        width: 320,
        height: 240,
    };
    let options = InitOptions::default()
        .with_device_selection(AnyGraphicsDevice)
        .with_surface(HeadlessSurface::new("main", extent));
    let Some(mut ctx) = build(options) else { return };

    let sc = ctx.swapchain("main").expect("surface registered under its id");
    if !sc.is_presentable() {
        eprintln!("skipping: device cannot present to a headless surface");
        return;
    }
    let details = *sc.details().expect("negotiated details");
    assert_eq!(sc.image_views().len(), sc.images().len());
    assert!(sc.image_count() >= 1);
    assert!(details.extent.width > 0 && details.extent.height > 0);
    assert!(ctx.present_queues().contains_key("main"));

    let before = (details.format.format, details.present_mode, sc.image_count());
    let old = sc.swapchain();

    ctx.recreate_swapchain("main", extent).unwrap();
    let sc = ctx.swapchain("main").unwrap();
    let after = sc.details().unwrap();
    assert_eq!(after.format.format, before.0);
    assert_eq!(after.present_mode, before.1);
    assert!(sc.image_count() >= before.2);
    assert_eq!(sc.image_views().len(), sc.images().len());
    assert_ne!(sc.swapchain(), vk::SwapchainKHR::null());
    assert_ne!(sc.swapchain(), old);

    assert!(matches!(
        ctx.recreate_swapchain("missing", extent),
        Err(StartupError::UnknownSurface(_))
    ));
}

#[test]
fn duplicate_surface_ids_fail_before_touching_the_driver() {
    let extent = vk::Extent2D {
        width: 16,
        height: 16,
    };
    let options = InitOptions::default()
        .with_surface(HeadlessSurface::new("main", extent))
        .with_surface(HeadlessSurface::new("main", extent));
    match Context::new(options) {
        Err(StartupError::DuplicateSurfaceId(id)) => assert_eq!(id, "main"),
        Err(StartupError::Loader(_)) => eprintln!("skipping: no Vulkan loader"),
        other => panic!("expected DuplicateSurfaceId, got {other:?}"),
    }
}
