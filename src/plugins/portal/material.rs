use bevy::{
    pbr::{MaterialPipeline, MaterialPipelineKey},
    prelude::*,
    reflect::TypeUuid,
    render::{
        mesh::MeshVertexBufferLayout,
        render_resource::{
            AsBindGroup, RenderPipelineDescriptor, ShaderRef, SpecializedMeshPipelineError,
        },
    },
};

/// Material of a linked portal: shows the texture rendered by its virtual camera, sampled in
/// screen space so the view lines up with the rest of the frame.
#[derive(AsBindGroup, Debug, Clone, TypeUuid)]
#[uuid = "d58f6790-3553-4e08-8e93-3c6f6e097b31"]
pub struct PortalViewMaterial {
    #[texture(0)]
    #[sampler(1)]
    pub view: Handle<Image>,
}

impl Material for PortalViewMaterial {
    fn fragment_shader() -> ShaderRef {
        "shaders/portal_view.wgsl".into()
    }

    fn specialize(
        _pipeline: &MaterialPipeline<Self>,
        descriptor: &mut RenderPipelineDescriptor,
        _layout: &MeshVertexBufferLayout,
        _key: MaterialPipelineKey<Self>,
    ) -> Result<(), SpecializedMeshPipelineError> {
        descriptor.primitive.cull_mode = None;
        Ok(())
    }
}
