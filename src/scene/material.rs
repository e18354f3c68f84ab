use std::collections::BTreeSet;

use glam::{Vec3, Vec4};

use super::{
    document::{Document, Material, TextureInfo},
    LoadError,
};
use crate::render_context::{Drawcall, ShaderParameters, Texture};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShadingModel {
    MetallicRoughness,
    SpecularGlossiness,
}

/// A texture slot of a material: the feature flag and sampler uniform it drives,
/// and the image that fills it.
#[derive(Clone, Debug, PartialEq)]
pub struct MaterialTexture {
    pub flag: &'static str,
    pub uniform: &'static str,
    pub image: usize,
}

#[derive(Clone, Debug)]
pub struct ResolvedMaterial {
    pub model: ShadingModel,
    pub factors: ShaderParameters,
    pub textures: Vec<MaterialTexture>,
}

fn slot(document: &Document, info: Option<TextureInfo>, flag: &'static str, uniform: &'static str) -> Option<MaterialTexture> {
    let image = document.texture_image(&info?)?;
    Some(MaterialTexture { flag, uniform, image })
}

impl ResolvedMaterial {
    /// Factors a primitive without a material is drawn with.
    pub fn default_metallic_roughness() -> Self {
        Self {
            model: ShadingModel::MetallicRoughness,
            factors: ShaderParameters::new()
                .with("uBaseColorFactor", Vec4::ONE)
                .with("uMetallicFactor", 1.0)
                .with("uRoughnessFactor", 1.0)
                .with("uEmissiveFactor", Vec3::ZERO),
            textures: Vec::new(),
        }
    }

    pub fn resolve(document: &Document, index: usize) -> Result<Self, LoadError> {
        let material: &Material = document.materials.get(index).ok_or(LoadError::DanglingReference { what: "material", index })?;
        if material.extensions.unlit.is_some() {
            return Err(LoadError::UnsupportedMaterial(index));
        }

        let mut factors = ShaderParameters::new();
        let mut textures = Vec::new();
        let model = if let Some(spec_gloss) = &material.extensions.specular_glossiness {
            factors
                .set("uBaseColorFactor", Vec4::from_array(spec_gloss.diffuse_factor))
                .set("uSpecularFactor", Vec3::from_array(spec_gloss.specular_factor))
                .set("uGlossinessFactor", spec_gloss.glossiness_factor);
            textures.extend(slot(document, spec_gloss.diffuse_texture, "USE_BASECOLOR_TEX", "uBaseColorTex"));
            textures.extend(slot(document, spec_gloss.specular_glossiness_texture, "USE_SPECGLOSS_TEX", "uSpecGlossTex"));
            ShadingModel::SpecularGlossiness
        } else if let Some(pbr) = &material.pbr_metallic_roughness {
            factors
                .set("uBaseColorFactor", Vec4::from_array(pbr.base_color_factor))
                .set("uMetallicFactor", pbr.metallic_factor)
                .set("uRoughnessFactor", pbr.roughness_factor);
            textures.extend(slot(document, pbr.base_color_texture, "USE_BASECOLOR_TEX", "uBaseColorTex"));
            textures.extend(slot(document, pbr.metallic_roughness_texture, "USE_METALROUGH_TEX", "uMetalRoughTex"));
            ShadingModel::MetallicRoughness
        } else {
            return Err(LoadError::UnsupportedMaterial(index));
        };

        factors.set("uEmissiveFactor", Vec3::from_array(material.emissive_factor));
        textures.extend(slot(document, material.normal_texture, "USE_NORMAL_TEX", "uNormalTex"));
        textures.extend(slot(document, material.occlusion_texture, "USE_OCCLUSION_TEX", "uOcclusionTex"));
        textures.extend(slot(document, material.emissive_texture, "USE_EMISSIVE_TEX", "uEmissiveTex"));
        Ok(Self { model, factors, textures })
    }

    /// Sets factors, and the flag plus sampler of every texture whose image has loaded.
    /// Slots still waiting on their image keep the flag cleared.
    pub fn apply(&self, drawcall: &mut Drawcall, images: &[Option<Texture>]) {
        drawcall.parameters.merge(&self.factors);
        if self.model == ShadingModel::SpecularGlossiness {
            drawcall.set_flag("MATERIAL_SPECULAR_GLOSSINESS", 1);
        }
        for texture in &self.textures {
            match images.get(texture.image).and_then(Option::as_ref) {
                Some(image) => {
                    drawcall.set_flag(texture.flag, 1);
                    drawcall.parameters.set(texture.uniform, image);
                }
                None => {
                    drawcall.remove_flag(texture.flag);
                    drawcall.parameters.remove(texture.uniform);
                }
            }
        }
    }
}

/// Resolves every material referenced by a primitive. Slots of unreferenced materials stay `None`.
/// All referenced materials must share one shading model.
pub fn resolve_materials(document: &Document) -> Result<Vec<Option<ResolvedMaterial>>, LoadError> {
    let used: BTreeSet<usize> = document
        .meshes()
        .iter()
        .flat_map(|mesh| mesh.primitives.iter().filter_map(|primitive| primitive.material))
        .collect();

    let mut resolved: Vec<Option<ResolvedMaterial>> = (0..document.materials.len()).map(|_| None).collect();
    let mut model = None;
    for index in used {
        let material = ResolvedMaterial::resolve(document, index)?;
        match model {
            None => model = Some(material.model),
            Some(model) if model != material.model => return Err(LoadError::MixedMaterialModels),
            Some(_) => {}
        }
        resolved[index] = Some(material);
    }
    Ok(resolved)
}

/// Images holding color data, uploaded as sRGB.
pub fn srgb_images(document: &Document) -> BTreeSet<usize> {
    let mut images = BTreeSet::new();
    for material in &document.materials {
        let infos = [
            material.pbr_metallic_roughness.as_ref().and_then(|pbr| pbr.base_color_texture),
            material.extensions.specular_glossiness.as_ref().and_then(|sg| sg.diffuse_texture),
            material.emissive_texture,
        ];
        images.extend(infos.iter().flatten().filter_map(|info| document.texture_image(info)));
    }
    images
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render_context::{
        headless::HeadlessApi, Capabilities, ParamValue, PixelFormat, RenderContext, TextureData, TextureKind, Topology,
    };

    const MATERIALS: &str = r#"{
        "meshes": [{ "primitives": [
            { "attributes": {}, "material": 0 },
            { "attributes": {}, "material": 1 }
        ] }],
        "materials": [
            {
                "pbrMetallicRoughness": {
                    "baseColorFactor": [1, 0, 0, 1],
                    "metallicFactor": 0.25,
                    "baseColorTexture": { "index": 0 }
                },
                "normalTexture": { "index": 1 },
                "emissiveFactor": [0, 0.5, 0]
            },
            { "pbrMetallicRoughness": { "roughnessFactor": 0.5 } },
            { "extensions": { "KHR_materials_pbrSpecularGlossiness": { "glossinessFactor": 0.3 } } }
        ],
        "textures": [{ "source": 0 }, { "source": 1 }],
        "images": [{ "uri": "albedo.png" }, { "uri": "normal.png" }]
    }"#;

    #[test]
    fn metallic_roughness_factors_and_slots() {
        let document = Document::parse(MATERIALS.as_bytes()).unwrap();
        let material = ResolvedMaterial::resolve(&document, 0).unwrap();
        assert_eq!(material.model, ShadingModel::MetallicRoughness);
        assert_eq!(material.factors.get("uMetallicFactor"), Some(&ParamValue::Float(0.25)));
        assert_eq!(material.factors.get("uRoughnessFactor"), Some(&ParamValue::Float(1.0)));
        assert_eq!(material.factors.get("uEmissiveFactor"), Some(&ParamValue::Vec3(Vec3::new(0.0, 0.5, 0.0))));
        let flags: Vec<_> = material.textures.iter().map(|texture| texture.flag).collect();
        assert_eq!(flags, vec!["USE_BASECOLOR_TEX", "USE_NORMAL_TEX"]);
        assert_eq!(srgb_images(&document).into_iter().collect::<Vec<_>>(), vec![0]);
    }

    #[test]
    fn specular_glossiness_takes_precedence() {
        let json = MATERIALS.replace(
            r#"{ "extensions": { "KHR_materials_pbrSpecularGlossiness": { "glossinessFactor": 0.3 } } }"#,
            r#"{ "pbrMetallicRoughness": {}, "extensions": { "KHR_materials_pbrSpecularGlossiness": { "glossinessFactor": 0.3 } } }"#,
        );
        let document = Document::parse(json.as_bytes()).unwrap();
        let material = ResolvedMaterial::resolve(&document, 2).unwrap();
        assert_eq!(material.model, ShadingModel::SpecularGlossiness);
        assert_eq!(material.factors.get("uGlossinessFactor"), Some(&ParamValue::Float(0.3)));
        assert_eq!(material.factors.get("uSpecularFactor"), Some(&ParamValue::Vec3(Vec3::ONE)));
    }

    #[test]
    fn mixed_models_and_unsupported_shapes_are_fatal() {
        let mixed = MATERIALS.replace(r#""material": 1 }"#, r#""material": 2 }"#);
        let document = Document::parse(mixed.as_bytes()).unwrap();
        assert!(matches!(resolve_materials(&document), Err(LoadError::MixedMaterialModels)));

        let document = Document::parse(MATERIALS.as_bytes()).unwrap();
        let resolved = resolve_materials(&document).unwrap();
        assert!(resolved[0].is_some() && resolved[1].is_some() && resolved[2].is_none());

        let unlit = r#"{ "meshes": [], "materials": [
            { "pbrMetallicRoughness": {}, "extensions": { "KHR_materials_unlit": {} } },
            { "name": "bare" }
        ] }"#;
        let document = Document::parse(unlit.as_bytes()).unwrap();
        assert!(matches!(ResolvedMaterial::resolve(&document, 0), Err(LoadError::UnsupportedMaterial(0))));
        assert!(matches!(ResolvedMaterial::resolve(&document, 1), Err(LoadError::UnsupportedMaterial(1))));
    }

    #[test]
    fn texture_flags_follow_image_arrival() {
        let (api, _probe) = HeadlessApi::new(Capabilities::FULL);
        let mut ctx = RenderContext::new(Box::new(api));
        let document = Document::parse(MATERIALS.as_bytes()).unwrap();
        let material = ResolvedMaterial::resolve(&document, 0).unwrap();
        let mut drawcall = ctx.create_drawcall(Topology::Triangles, 3);

        let mut images: Vec<Option<Texture>> = vec![None, None];
        material.apply(&mut drawcall, &images);
        assert!(drawcall.flags().is_empty());
        assert!(drawcall.parameters.contains("uBaseColorFactor"));

        let mut albedo = ctx.create_texture(TextureKind::D2);
        albedo.bind(&mut ctx).set_data(&mut ctx, 1, 1, PixelFormat::Srgba8, Some(TextureData::U8(&[255; 4]))).unwrap();
        let albedo_id = albedo.id();
        images[0] = Some(albedo);
        material.apply(&mut drawcall, &images);
        assert_eq!(drawcall.flags().get("USE_BASECOLOR_TEX"), Some(&1));
        assert!(!drawcall.flags().contains_key("USE_NORMAL_TEX"));
        assert_eq!(drawcall.parameters.get("uBaseColorTex"), Some(&ParamValue::Texture(albedo_id)));
    }
}
