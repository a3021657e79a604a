//! Pipeline and pipeline layout creation

use std::ffi::CString;

use ash::vk;

use crate::backend::vulkan::device::{RenderPassKey, VulkanDevice, VulkanPipeline};
use crate::backend::vulkan::format::{
    blend_factor_to_vk, blend_op_to_vk, color_write_mask_to_vk, compare_op_to_vk, cull_mode_to_vk,
    descriptor_type_to_vk, front_face_to_vk, input_rate_to_vk, polygon_mode_to_vk, sample_count_to_vk,
    shader_stage_to_vk, shader_stages_to_vk, stencil_face_to_vk, topology_to_vk, vertex_format_to_vk,
};
use crate::error::{Error, Result};
use crate::graphics::{ComputePipelineDescriptor, GraphicsPipelineDescriptor, ResourceLayoutEntry, Shader, ShaderStage};
use crate::{engine_debug, engine_err};

impl VulkanDevice {
    /// Set layouts for sets `0..=max set`, gaps filled with empty layouts
    fn create_pipeline_layout(
        &mut self,
        resource_layout: &[ResourceLayoutEntry],
    ) -> Result<(vk::PipelineLayout, Vec<vk::DescriptorSetLayout>)> {
        let device = &self.context.device;
        let set_count = resource_layout.iter().map(|entry| entry.set + 1).max().unwrap_or(0);

        let mut set_layouts = Vec::with_capacity(set_count as usize);
        let destroy_all = |layouts: &[vk::DescriptorSetLayout]| unsafe {
            for layout in layouts {
                device.destroy_descriptor_set_layout(*layout, None);
            }
        };
        for set in 0..set_count {
            let bindings: Vec<vk::DescriptorSetLayoutBinding> = resource_layout
                .iter()
                .filter(|entry| entry.set == set)
                .map(|entry| {
                    vk::DescriptorSetLayoutBinding::default()
                        .binding(entry.binding)
                        .descriptor_type(descriptor_type_to_vk(entry.kind))
                        .descriptor_count(1)
                        .stage_flags(shader_stages_to_vk(entry.stages))
                })
                .collect();
            let info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings);
            match unsafe { device.create_descriptor_set_layout(&info, None) } {
                Ok(layout) => set_layouts.push(layout),
                Err(e) => {
                    destroy_all(&set_layouts);
                    return Err(engine_err!("galaxy3d::vulkan", "Failed to create descriptor set layout: {:?}", e));
                }
            }
        }

        let info = vk::PipelineLayoutCreateInfo::default().set_layouts(&set_layouts);
        match unsafe { device.create_pipeline_layout(&info, None) } {
            Ok(layout) => Ok((layout, set_layouts)),
            Err(e) => {
                destroy_all(&set_layouts);
                Err(engine_err!("galaxy3d::vulkan", "Failed to create pipeline layout: {:?}", e))
            }
        }
    }

    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout, set_layouts: &[vk::DescriptorSetLayout]) {
        unsafe {
            self.context.device.destroy_pipeline_layout(layout, None);
            for set_layout in set_layouts {
                self.context.device.destroy_descriptor_set_layout(*set_layout, None);
            }
        }
    }

    fn create_shader_module(&self, shader: &Shader) -> Result<(vk::ShaderModule, CString)> {
        let entry_point = CString::new(shader.entry_point())
            .map_err(|_| Error::InvalidResource("shader entry point contains a NUL byte".to_string()))?;
        let info = vk::ShaderModuleCreateInfo::default().code(shader.code());
        let module = unsafe { self.context.device.create_shader_module(&info, None) }
            .map_err(|e| engine_err!("galaxy3d::vulkan", "Failed to create {:?} shader module: {:?}", shader.stage(), e))?;
        Ok((module, entry_point))
    }

    pub(crate) fn build_graphics_pipeline(&mut self, desc: &GraphicsPipelineDescriptor) -> Result<VulkanPipeline> {
        let samples = sample_count_to_vk(desc.sample_count)
            .ok_or_else(|| Error::InvalidResource(format!("unsupported sample count {}", desc.sample_count)))?;
        let render_pass = self.render_pass(&RenderPassKey::compatible(
            &desc.color_formats,
            desc.depth_stencil_format,
            desc.sample_count,
        ))?;
        let (layout, set_layouts) = self.create_pipeline_layout(&desc.resource_layout)?;

        let mut modules = Vec::with_capacity(2);
        for shader in std::iter::once(&desc.vertex_shader).chain(desc.fragment_shader.iter()) {
            match self.create_shader_module(shader) {
                Ok((module, entry_point)) => modules.push((shader.stage(), module, entry_point)),
                Err(e) => {
                    self.destroy_modules(&modules);
                    self.destroy_pipeline_layout(layout, &set_layouts);
                    return Err(e);
                }
            }
        }
        let stages: Vec<vk::PipelineShaderStageCreateInfo> = modules
            .iter()
            .map(|(stage, module, entry_point)| {
                vk::PipelineShaderStageCreateInfo::default()
                    .stage(shader_stage_to_vk(*stage))
                    .module(*module)
                    .name(entry_point)
            })
            .collect();

        let bindings: Vec<vk::VertexInputBindingDescription> = desc
            .vertex_buffers
            .iter()
            .enumerate()
            .map(|(binding, buffer)| vk::VertexInputBindingDescription {
                binding: binding as u32,
                stride: buffer.stride,
                input_rate: input_rate_to_vk(buffer.input_rate),
            })
            .collect();
        let attributes: Vec<vk::VertexInputAttributeDescription> = desc
            .vertex_buffers
            .iter()
            .enumerate()
            .flat_map(|(binding, buffer)| {
                buffer.attributes.iter().map(move |attribute| vk::VertexInputAttributeDescription {
                    location: attribute.location,
                    binding: binding as u32,
                    format: vertex_format_to_vk(attribute.format),
                    offset: attribute.offset,
                })
            })
            .collect();
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&bindings)
            .vertex_attribute_descriptions(&attributes);

        let input_assembly =
            vk::PipelineInputAssemblyStateCreateInfo::default().topology(topology_to_vk(desc.topology));
        let viewport = vk::PipelineViewportStateCreateInfo::default().viewport_count(1).scissor_count(1);

        let raster = &desc.rasterization;
        let (bias_constant, bias_slope) = raster.depth_bias.unwrap_or((0.0, 0.0));
        let rasterization = vk::PipelineRasterizationStateCreateInfo::default()
            .polygon_mode(polygon_mode_to_vk(raster.polygon_mode))
            .cull_mode(cull_mode_to_vk(raster.cull_mode))
            .front_face(front_face_to_vk(raster.front_face))
            .depth_bias_enable(raster.depth_bias.is_some())
            .depth_bias_constant_factor(bias_constant)
            .depth_bias_slope_factor(bias_slope)
            .line_width(1.0);

        let multisample = vk::PipelineMultisampleStateCreateInfo::default().rasterization_samples(samples);

        let depth = &desc.depth_stencil;
        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(depth.depth_test_enable)
            .depth_write_enable(depth.depth_write_enable)
            .depth_compare_op(compare_op_to_vk(depth.depth_compare_op))
            .stencil_test_enable(depth.stencil_test_enable)
            .front(stencil_face_to_vk(&depth.front))
            .back(stencil_face_to_vk(&depth.back))
            .min_depth_bounds(0.0)
            .max_depth_bounds(1.0);

        let blend = &desc.color_blend;
        let blend_attachment = vk::PipelineColorBlendAttachmentState::default()
            .blend_enable(blend.blend_enable)
            .src_color_blend_factor(blend_factor_to_vk(blend.src_color_factor))
            .dst_color_blend_factor(blend_factor_to_vk(blend.dst_color_factor))
            .color_blend_op(blend_op_to_vk(blend.color_blend_op))
            .src_alpha_blend_factor(blend_factor_to_vk(blend.src_alpha_factor))
            .dst_alpha_blend_factor(blend_factor_to_vk(blend.dst_alpha_factor))
            .alpha_blend_op(blend_op_to_vk(blend.alpha_blend_op))
            .color_write_mask(color_write_mask_to_vk(blend.write_mask));
        let blend_attachments = vec![blend_attachment; desc.color_formats.len()];
        let color_blend = vk::PipelineColorBlendStateCreateInfo::default().attachments(&blend_attachments);

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic = vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

        let info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport)
            .rasterization_state(&rasterization)
            .multisample_state(&multisample)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blend)
            .dynamic_state(&dynamic)
            .layout(layout)
            .render_pass(render_pass)
            .subpass(0);

        let created =
            unsafe { self.context.device.create_graphics_pipelines(vk::PipelineCache::null(), &[info], None) };
        self.destroy_modules(&modules);
        match created {
            Ok(pipelines) => {
                engine_debug!(
                    "galaxy3d::vulkan",
                    "Graphics pipeline created ({} vertex buffers, {} sets)",
                    desc.vertex_buffers.len(),
                    set_layouts.len()
                );
                Ok(VulkanPipeline {
                    raw: pipelines[0],
                    layout,
                    set_layouts,
                    bind_point: vk::PipelineBindPoint::GRAPHICS,
                })
            }
            Err((_, e)) => {
                self.destroy_pipeline_layout(layout, &set_layouts);
                Err(engine_err!("galaxy3d::vulkan", "Failed to create graphics pipeline: {:?}", e))
            }
        }
    }

    pub(crate) fn build_compute_pipeline(&mut self, desc: &ComputePipelineDescriptor) -> Result<VulkanPipeline> {
        let (layout, set_layouts) = self.create_pipeline_layout(&desc.resource_layout)?;
        let (module, entry_point) = match self.create_shader_module(&desc.shader) {
            Ok(created) => created,
            Err(e) => {
                self.destroy_pipeline_layout(layout, &set_layouts);
                return Err(e);
            }
        };

        let stage = vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::COMPUTE)
            .module(module)
            .name(&entry_point);
        let info = vk::ComputePipelineCreateInfo::default().stage(stage).layout(layout);
        let created =
            unsafe { self.context.device.create_compute_pipelines(vk::PipelineCache::null(), &[info], None) };
        unsafe { self.context.device.destroy_shader_module(module, None) };

        match created {
            Ok(pipelines) => Ok(VulkanPipeline {
                raw: pipelines[0],
                layout,
                set_layouts,
                bind_point: vk::PipelineBindPoint::COMPUTE,
            }),
            Err((_, e)) => {
                self.destroy_pipeline_layout(layout, &set_layouts);
                Err(engine_err!("galaxy3d::vulkan", "Failed to create compute pipeline: {:?}", e))
            }
        }
    }

    fn destroy_modules(&self, modules: &[(ShaderStage, vk::ShaderModule, CString)]) {
        for (_, module, _) in modules {
            unsafe { self.context.device.destroy_shader_module(*module, None) };
        }
    }
}
