//! Vertex (shape) and per-draw uniform (instance) resources.

use crate::pipeline::{Pipeline, FLOATS_PER_VERTEX};
use crate::texture::Texture;
use ash::vk;
use vitral_gpu::descriptors::{write_combined_image_sampler, write_uniform_buffer, DescriptorPool};
use vitral_gpu::error::{GpuError, Result};
use vitral_gpu::DeviceContext;

/// Byte size of the per-instance uniform: one column-major mat4.
pub const MATRIX_SIZE: vk::DeviceSize = (std::mem::size_of::<f32>() * 16) as vk::DeviceSize;

/// Drawable geometry: a vertex buffer uploaded once at creation.
///
/// Holds non-owning handles into its pipeline; the caller must not destroy
/// the pipeline while shapes still reference it.
pub struct Shape {
    pub vertex_buffer: vk::Buffer,
    pub vertex_memory: vk::DeviceMemory,
    pub vertex_count: u32,
    pub pipeline: vk::Pipeline,
    pub pipeline_layout: vk::PipelineLayout,
}

impl Shape {
    /// Create the vertex buffer and upload `vertices` into host-visible
    /// memory.
    ///
    /// Vertices are 8 floats each (position + auxiliary vector); the slice
    /// length must be a multiple of 8.
    ///
    /// # Safety
    /// The context and pipeline must be valid.
    pub unsafe fn new(ctx: &DeviceContext, pipeline: &Pipeline, vertices: &[f32]) -> Result<Self> {
        if vertices.is_empty() || vertices.len() % FLOATS_PER_VERTEX as usize != 0 {
            return Err(GpuError::InvalidState(format!(
                "Vertex data length {} is not a positive multiple of {FLOATS_PER_VERTEX}",
                vertices.len()
            )));
        }

        let device = ctx.device();

        let buffer_info = vk::BufferCreateInfo::default()
            .size(std::mem::size_of_val(vertices) as vk::DeviceSize)
            .usage(vk::BufferUsageFlags::VERTEX_BUFFER)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let vertex_buffer = device.create_buffer(&buffer_info, None)?;

        let requirements = device.get_buffer_memory_requirements(vertex_buffer);
        let alloc_info = vk::MemoryAllocateInfo::default()
            .allocation_size(requirements.size)
            .memory_type_index(ctx.memory_type_index(
                requirements.memory_type_bits,
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            ));

        let vertex_memory = match device.allocate_memory(&alloc_info, None) {
            Ok(memory) => memory,
            Err(e) => {
                device.destroy_buffer(vertex_buffer, None);
                return Err(e.into());
            }
        };

        let result = device
            .bind_buffer_memory(vertex_buffer, vertex_memory, 0)
            .map_err(GpuError::from)
            .and_then(|()| {
                let data = device.map_memory(
                    vertex_memory,
                    0,
                    vk::WHOLE_SIZE,
                    vk::MemoryMapFlags::empty(),
                )?;
                std::ptr::copy_nonoverlapping(
                    bytemuck::cast_slice::<f32, u8>(vertices).as_ptr(),
                    data.cast::<u8>(),
                    std::mem::size_of_val(vertices),
                );
                device.unmap_memory(vertex_memory);
                Ok(())
            });

        if let Err(e) = result {
            device.destroy_buffer(vertex_buffer, None);
            device.free_memory(vertex_memory, None);
            return Err(e);
        }

        Ok(Self {
            vertex_buffer,
            vertex_memory,
            vertex_count: (vertices.len() / FLOATS_PER_VERTEX as usize) as u32,
            pipeline: pipeline.pipeline,
            pipeline_layout: pipeline.layout,
        })
    }

    /// Destroy the vertex buffer and its memory.
    ///
    /// # Safety
    /// The device must be valid and the shape must not be in use.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        device.destroy_buffer(self.vertex_buffer, None);
        device.free_memory(self.vertex_memory, None);
    }
}

/// Per-draw uniform state: a mat4 uniform buffer plus the descriptor set
/// binding it (and optionally a texture) to a pipeline.
pub struct Instance {
    pub matrix_buffer: vk::Buffer,
    pub uniform_memory: vk::DeviceMemory,
    pub descriptor_pool: DescriptorPool,
    pub descriptor_set: vk::DescriptorSet,
}

impl Instance {
    /// Create the uniform buffer and descriptor set for one draw instance.
    ///
    /// The descriptor set is allocated from the pipeline's layout; when the
    /// pipeline expects textures, `texture` must be provided.
    ///
    /// # Safety
    /// The context, pipeline, and texture must be valid.
    pub unsafe fn new(
        ctx: &DeviceContext,
        pipeline: &Pipeline,
        texture: Option<&Texture>,
    ) -> Result<Self> {
        if pipeline.texture_count > 0 && texture.is_none() {
            return Err(GpuError::InvalidState(format!(
                "Pipeline expects {} texture(s) but none was provided",
                pipeline.texture_count
            )));
        }

        let device = ctx.device();

        let buffer_info = vk::BufferCreateInfo::default()
            .size(MATRIX_SIZE)
            .usage(vk::BufferUsageFlags::UNIFORM_BUFFER)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let matrix_buffer = device.create_buffer(&buffer_info, None)?;

        let mut pool_sizes = vec![vk::DescriptorPoolSize::default()
            .ty(vk::DescriptorType::UNIFORM_BUFFER)
            .descriptor_count(1)];
        if pipeline.texture_count > 0 {
            pool_sizes.push(
                vk::DescriptorPoolSize::default()
                    .ty(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                    .descriptor_count(pipeline.texture_count),
            );
        }

        let descriptor_pool = match DescriptorPool::new(device, 1, &pool_sizes) {
            Ok(pool) => pool,
            Err(e) => {
                device.destroy_buffer(matrix_buffer, None);
                return Err(e);
            }
        };

        let descriptor_set = match descriptor_pool.allocate(device, pipeline.descriptor_set_layout)
        {
            Ok(set) => set,
            Err(e) => {
                descriptor_pool.destroy(device);
                device.destroy_buffer(matrix_buffer, None);
                return Err(e);
            }
        };

        let requirements = device.get_buffer_memory_requirements(matrix_buffer);
        let alloc_info = vk::MemoryAllocateInfo::default()
            .allocation_size(requirements.size)
            .memory_type_index(ctx.memory_type_index(
                requirements.memory_type_bits,
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            ));

        let uniform_memory = match device.allocate_memory(&alloc_info, None) {
            Ok(memory) => memory,
            Err(e) => {
                descriptor_pool.destroy(device);
                device.destroy_buffer(matrix_buffer, None);
                return Err(e.into());
            }
        };

        if let Err(e) = device.bind_buffer_memory(matrix_buffer, uniform_memory, 0) {
            descriptor_pool.destroy(device);
            device.destroy_buffer(matrix_buffer, None);
            device.free_memory(uniform_memory, None);
            return Err(e.into());
        }

        let instance = Self {
            matrix_buffer,
            uniform_memory,
            descriptor_pool,
            descriptor_set,
        };
        instance.write_descriptors(device, texture);

        Ok(instance)
    }

    /// Write the uniform descriptor and, when present, the texture
    /// descriptor at binding 1.
    ///
    /// # Safety
    /// The device and texture must be valid.
    pub unsafe fn write_descriptors(&self, device: &ash::Device, texture: Option<&Texture>) {
        write_uniform_buffer(
            device,
            self.descriptor_set,
            0,
            self.matrix_buffer,
            0,
            MATRIX_SIZE,
        );

        if let Some(texture) = texture {
            write_combined_image_sampler(
                device,
                self.descriptor_set,
                1,
                texture.sampler,
                texture.view,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            );
        }
    }

    /// Point this instance's texture binding at a different texture.
    ///
    /// # Safety
    /// The device and texture must be valid, and no frame using this
    /// instance may be in flight.
    pub unsafe fn set_texture(&self, device: &ash::Device, texture: &Texture) {
        write_combined_image_sampler(
            device,
            self.descriptor_set,
            1,
            texture.sampler,
            texture.view,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        );
    }

    /// Write the transform matrix into the uniform buffer.
    ///
    /// # Safety
    /// The device must be valid, and no frame using this instance may be
    /// in flight.
    pub unsafe fn set_matrix(&self, device: &ash::Device, matrix: &[f32; 16]) -> Result<()> {
        let data = device.map_memory(
            self.uniform_memory,
            0,
            vk::WHOLE_SIZE,
            vk::MemoryMapFlags::empty(),
        )?;
        std::ptr::copy_nonoverlapping(
            matrix.as_ptr().cast::<u8>(),
            data.cast::<u8>(),
            MATRIX_SIZE as usize,
        );
        device.unmap_memory(self.uniform_memory);
        Ok(())
    }

    /// Destroy the uniform buffer, memory, and descriptor pool.
    ///
    /// # Safety
    /// The device must be valid and the instance must not be in use.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        self.descriptor_pool.destroy(device);
        device.destroy_buffer(self.matrix_buffer, None);
        device.free_memory(self.uniform_memory, None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matrix_uniform_is_sixty_four_bytes() {
        assert_eq!(MATRIX_SIZE, 64);
    }
}
