// SPDX-License-Identifier: CEPL-1.0
//! Render pass assembly and per-image framebuffers.

use ash::vk;
use tracing::{debug, warn};

use crate::error::Result;
use crate::handle::{FramebufferHandle, RenderPassHandle};

/// Caller-supplied pieces of a render pass. Attachment indices used by the
/// subpass references follow color, resolve, preserve, then depth.
#[derive(Clone, Debug, Default)]
pub struct RenderpassData<'a> {
    pub color_attachments: Vec<vk::AttachmentDescription>,
    pub resolve_attachments: Vec<vk::AttachmentDescription>,
    pub preserve_attachments: Vec<vk::AttachmentDescription>,
    pub depth_attachment: Option<vk::AttachmentDescription>,
    pub subpasses: Vec<vk::SubpassDescription<'a>>,
}

/// Attachments and dependencies, ready to point a create info at.
#[derive(Clone, Debug)]
pub struct RenderpassLayout {
    pub attachments: Vec<vk::AttachmentDescription>,
    pub dependencies: Vec<vk::SubpassDependency>,
}

/// EXTERNAL -> 0, guarding color attachment output.
pub fn implicit_color_dependency() -> vk::SubpassDependency {
    vk::SubpassDependency {
        src_subpass: vk::SUBPASS_EXTERNAL,
        dst_subpass: 0,
        src_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        src_access_mask: vk::AccessFlags::empty(),
        dst_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        dst_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        ..Default::default()
    }
}

/// EXTERNAL -> 0, guarding early and late fragment tests.
pub fn depth_dependency() -> vk::SubpassDependency {
    let tests = vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
        | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS;
    vk::SubpassDependency {
        src_subpass: vk::SUBPASS_EXTERNAL,
        dst_subpass: 0,
        src_stage_mask: tests,
        src_access_mask: vk::AccessFlags::empty(),
        dst_stage_mask: tests,
        dst_access_mask: vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        ..Default::default()
    }
}

pub fn layout(data: &RenderpassData<'_>, implicit_transition: bool) -> RenderpassLayout {
    if data.color_attachments.is_empty() {
        warn!("render pass has no color attachments");
    }
    if data.subpasses.is_empty() {
        warn!("render pass has no subpass descriptions");
    }
    for (index, subpass) in data.subpasses.iter().enumerate() {
        if subpass.color_attachment_count == 0 || subpass.p_color_attachments.is_null() {
            warn!(subpass = index, "subpass has no color attachment");
        }
    }

    let attachments: Vec<vk::AttachmentDescription> = data
        .color_attachments
        .iter()
        .chain(&data.resolve_attachments)
        .chain(&data.preserve_attachments)
        .chain(data.depth_attachment.as_ref())
        .copied()
        .collect();

    let mut dependencies = Vec::with_capacity(2);
    if implicit_transition {
        dependencies.push(implicit_color_dependency());
    }
    if data.depth_attachment.is_some() {
        dependencies.push(depth_dependency());
    }

    RenderpassLayout {
        attachments,
        dependencies,
    }
}

/// Pass `implicit_transition = false` when the first subpass already waits
/// at TOP_OF_PIPE.
pub fn create_renderpass(
    device: &ash::Device,
    data: &RenderpassData<'_>,
    implicit_transition: bool,
) -> Result<RenderPassHandle> {
    let layout = layout(data, implicit_transition);
    let info = vk::RenderPassCreateInfo::default()
        .attachments(&layout.attachments)
        .subpasses(&data.subpasses)
        .dependencies(&layout.dependencies);

    // SAFETY: every pointer in `info` borrows from `layout` or `data`, both
    // alive for this call.
    let pass = unsafe { RenderPassHandle::create(device.clone(), &info) }?;
    debug!(
        attachments = layout.attachments.len(),
        subpasses = data.subpasses.len(),
        dependencies = layout.dependencies.len(),
        "render pass created"
    );
    Ok(pass)
}

/// Clear-on-load color target that ends up ready to present.
pub fn present_color_attachment(format: vk::Format) -> vk::AttachmentDescription {
    vk::AttachmentDescription {
        format,
        samples: vk::SampleCountFlags::TYPE_1,
        load_op: vk::AttachmentLoadOp::CLEAR,
        store_op: vk::AttachmentStoreOp::STORE,
        stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
        stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
        initial_layout: vk::ImageLayout::UNDEFINED,
        final_layout: vk::ImageLayout::PRESENT_SRC_KHR,
        ..Default::default()
    }
}

pub fn depth_attachment(format: vk::Format) -> vk::AttachmentDescription {
    vk::AttachmentDescription {
        format,
        samples: vk::SampleCountFlags::TYPE_1,
        load_op: vk::AttachmentLoadOp::CLEAR,
        store_op: vk::AttachmentStoreOp::DONT_CARE,
        stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
        stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
        initial_layout: vk::ImageLayout::UNDEFINED,
        final_layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        ..Default::default()
    }
}

/// One framebuffer per swapchain view; `extra` (for example a shared depth
/// view) follows the swapchain view in every attachment list.
pub fn build_framebuffers<V>(
    views: &[vk::ImageView],
    extra: &[vk::ImageView],
    mut create: impl FnMut(&[vk::ImageView]) -> Result<V>,
) -> Result<Vec<V>> {
    let mut attachments = Vec::with_capacity(1 + extra.len());
    views
        .iter()
        .map(|&view| {
            attachments.clear();
            attachments.push(view);
            attachments.extend_from_slice(extra);
            create(&attachments)
        })
        .collect()
}

pub fn create_framebuffers(
    device: &ash::Device,
    render_pass: vk::RenderPass,
    views: &[vk::ImageView],
    extra: &[vk::ImageView],
    extent: vk::Extent2D,
) -> Result<Vec<FramebufferHandle>> {
    build_framebuffers(views, extra, |attachments| {
        let info = vk::FramebufferCreateInfo::default()
            .render_pass(render_pass)
            .attachments(attachments)
            .width(extent.width)
            .height(extent.height)
            .layers(1);
        unsafe { FramebufferHandle::create(device.clone(), &info) }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    fn att(format: vk::Format) -> vk::AttachmentDescription {
        vk::AttachmentDescription {
            format,
            ..Default::default()
        }
    }

    #[test]
    fn attachments_are_concatenated_in_order() {
        let data = RenderpassData {
            color_attachments: vec![att(vk::Format::B8G8R8A8_SRGB), att(vk::Format::R8_UNORM)],
            resolve_attachments: vec![att(vk::Format::R16_SFLOAT)],
            preserve_attachments: vec![att(vk::Format::R32_UINT)],
            depth_attachment: Some(att(vk::Format::D32_SFLOAT)),
            subpasses: vec![],
        };
        let formats: Vec<_> = layout(&data, true)
            .attachments
            .iter()
            .map(|a| a.format)
            .collect();
        assert_eq!(
            formats,
            vec![
                vk::Format::B8G8R8A8_SRGB,
                vk::Format::R8_UNORM,
                vk::Format::R16_SFLOAT,
                vk::Format::R32_UINT,
                vk::Format::D32_SFLOAT,
            ]
        );
    }

    #[test]
    fn dependencies_follow_flags() {
        let color_only = RenderpassData {
            color_attachments: vec![att(vk::Format::B8G8R8A8_SRGB)],
            ..Default::default()
        };
        let deps = layout(&color_only, true).dependencies;
        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].src_subpass, vk::SUBPASS_EXTERNAL);
        assert_eq!(deps[0].dst_subpass, 0);
        assert_eq!(deps[0].dst_access_mask, vk::AccessFlags::COLOR_ATTACHMENT_WRITE);

        assert!(layout(&color_only, false).dependencies.is_empty());

        let with_depth = RenderpassData {
            depth_attachment: Some(att(vk::Format::D32_SFLOAT)),
            ..color_only
        };
        let deps = layout(&with_depth, false).dependencies;
        assert_eq!(deps.len(), 1);
        assert!(deps[0]
            .src_stage_mask
            .contains(vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS));
        assert_eq!(
            deps[0].dst_access_mask,
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE
        );
        assert_eq!(layout(&with_depth, true).dependencies.len(), 2);
    }

    #[test]
    fn empty_pass_still_lays_out() {
        let l = layout(&RenderpassData::default(), true);
        assert!(l.attachments.is_empty());
        assert_eq!(l.dependencies.len(), 1);
    }

    #[test]
    fn framebuffer_attachments_put_swapchain_view_first() {
        let views: Vec<vk::ImageView> = (1..=3).map(vk::ImageView::from_raw).collect();
        let depth = vk::ImageView::from_raw(99);
        let lists = build_framebuffers(&views, &[depth], |a| Ok(a.to_vec())).unwrap();
        assert_eq!(lists.len(), 3);
        for (list, view) in lists.iter().zip(&views) {
            assert_eq!(list, &vec![*view, depth]);
        }
    }
}
