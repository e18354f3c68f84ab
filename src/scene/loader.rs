use std::collections::BTreeSet;

use glam::{Mat4, Vec2};

use super::{
    accessor::view_bytes,
    animation::{BakedSkin, Clip, SkinJoints},
    document::Document,
    geometry::{Bounds, Geometry},
    glb,
    graph::SceneGraph,
    material::{resolve_materials, srgb_images, ResolvedMaterial},
    LoadError,
};
use crate::{
    assets::{decode_image, resolve_url, AssetFetcher, DecodedImage, Join, Pending},
    render_context::{
        DrawRequest, Filter, PixelFormat, RenderContext, ResourceError, Texture, TextureData, TextureKind, Wrap,
    },
};

fn upload_image(ctx: &mut RenderContext, image: &DecodedImage, srgb: bool) -> Result<Texture, ResourceError> {
    let format = if srgb { PixelFormat::Srgba8 } else { PixelFormat::Rgba8 };
    let mut texture = ctx.create_texture(TextureKind::D2);
    let uploaded = texture
        .bind(ctx)
        .set_data(ctx, image.width, image.height, format, Some(TextureData::U8(&image.pixels)))
        .and_then(|texture| texture.set_sampler(ctx, Filter::Anisotropic, Wrap::Repeat))
        .map(|_| ());
    match uploaded {
        Ok(()) => Ok(texture),
        Err(error) => {
            texture.destroy(ctx);
            Err(error)
        }
    }
}

/// Everything a loaded document owns on the GPU plus what is needed to draw it.
struct LoadedScene {
    graph: SceneGraph,
    geometry: Geometry,
    materials: Vec<Option<ResolvedMaterial>>,
    default_material: ResolvedMaterial,
    srgb: BTreeSet<usize>,
    images: Vec<Option<Texture>>,
    image_fetches: Vec<(usize, Pending<DecodedImage>)>,
    clips: Vec<Clip>,
    /// Indexed by clip, then skin.
    baked: Vec<Vec<BakedSkin>>,
}

impl LoadedScene {
    fn build(
        ctx: &mut RenderContext,
        fetcher: &dyn AssetFetcher,
        url: &str,
        document: Document,
        buffers: Vec<Vec<u8>>,
    ) -> Result<Self, LoadError> {
        // everything that can reject the document runs before GPU allocation
        let materials = resolve_materials(&document)?;
        let clips = (0..document.animations.len())
            .map(|index| Clip::from_document(&document, &buffers, index))
            .collect::<Result<Vec<_>, _>>()?;
        let skins = (0..document.skins.len())
            .map(|index| SkinJoints::from_document(&document, &buffers, index))
            .collect::<Result<Vec<_>, _>>()?;
        let graph = SceneGraph::from_document(&document);

        let geometry = Geometry::build(ctx, &document, &buffers)?;
        let mut baked: Vec<Vec<BakedSkin>> = Vec::with_capacity(clips.len());
        for clip in &clips {
            let mut per_skin = Vec::with_capacity(skins.len());
            for skin in &skins {
                match BakedSkin::bake(ctx, &graph, clip, skin) {
                    Ok(skin) => per_skin.push(skin),
                    Err(error) => {
                        for skin in baked.into_iter().flatten().chain(per_skin) {
                            skin.destroy(ctx);
                        }
                        geometry.destroy(ctx);
                        return Err(error);
                    }
                }
            }
            baked.push(per_skin);
        }

        let srgb = srgb_images(&document);
        let mut images: Vec<Option<Texture>> = (0..document.images.len()).map(|_| None).collect();
        let mut image_fetches = Vec::new();
        for (index, image) in document.images.iter().enumerate() {
            if let Some(uri) = &image.uri {
                image_fetches.push((index, fetcher.fetch_image(&resolve_url(url, uri))));
            } else if let Some(view) = image.buffer_view {
                let label = format!("{url}#image{index}");
                let decoded = view_bytes(&document, &buffers, view)
                    .map_err(|error| error.to_string())
                    .and_then(|bytes| decode_image(&label, bytes).map_err(|error| error.to_string()));
                match decoded.and_then(|image| upload_image(ctx, &image, srgb.contains(&index)).map_err(|e| e.to_string())) {
                    Ok(texture) => images[index] = Some(texture),
                    Err(error) => log::warn!("embedded image {index} of {url} unavailable: {error}"),
                }
            }
        }

        let mut scene = Self {
            graph,
            geometry,
            materials,
            default_material: ResolvedMaterial::default_metallic_roughness(),
            srgb,
            images,
            image_fetches,
            clips,
            baked,
        };
        scene.apply_materials();
        Ok(scene)
    }

    fn apply_materials(&mut self) {
        for mesh in &mut self.geometry.meshes {
            for primitive in &mut mesh.primitives {
                let material = primitive
                    .material
                    .and_then(|index| self.materials.get(index).and_then(Option::as_ref))
                    .unwrap_or(&self.default_material);
                material.apply(&mut primitive.drawcall, &self.images);
            }
        }
    }

    /// Turns arrived images into textures. A failed fetch leaves its slot empty.
    fn poll_images(&mut self, ctx: &mut RenderContext) {
        let mut arrived = false;
        let mut index = 0;
        while index < self.image_fetches.len() {
            let (image, pending) = &mut self.image_fetches[index];
            let image = *image;
            match pending.take() {
                None => {
                    index += 1;
                    continue;
                }
                Some(Ok(decoded)) => match upload_image(ctx, &decoded, self.srgb.contains(&image)) {
                    Ok(texture) => {
                        log::debug!("image {image} ready ({}x{})", decoded.width, decoded.height);
                        self.images[image] = Some(texture);
                        arrived = true;
                    }
                    Err(error) => log::warn!("image {image} could not be uploaded: {error}"),
                },
                Some(Err(error)) => log::warn!("image {image} unavailable: {error}"),
            }
            self.image_fetches.swap_remove(index);
        }
        if arrived {
            self.apply_materials();
        }
    }

    fn destroy(self, ctx: &mut RenderContext) {
        self.geometry.destroy(ctx);
        for texture in self.images.into_iter().flatten() {
            texture.destroy(ctx);
        }
        for skin in self.baked.into_iter().flatten() {
            skin.destroy(ctx);
        }
    }
}

enum LoadState {
    Idle,
    FetchingDocument { url: String, pending: Pending<Vec<u8>> },
    FetchingBuffers { url: String, document: Document, join: Join<Vec<u8>> },
    Ready(Box<LoadedScene>),
    Failed,
}

/// Asynchronous glTF loader driven from the frame loop. Draw lists are only produced
/// once every buffer has arrived and the geometry has been built; images keep streaming
/// in after that.
pub struct SceneLoader {
    state: LoadState,
    root_transform: Mat4,
    animation: Option<(usize, f32)>,
}

impl Default for SceneLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl SceneLoader {
    pub fn new() -> Self {
        Self { state: LoadState::Idle, root_transform: Mat4::IDENTITY, animation: None }
    }

    /// Starts loading `url` (`.gltf` JSON or `.glb`). Any previous scene must have been
    /// destroyed by the caller.
    pub fn load(&mut self, fetcher: &dyn AssetFetcher, url: &str) {
        log::info!("loading scene {url}");
        self.state = LoadState::FetchingDocument { url: url.to_string(), pending: fetcher.fetch_binary(url) };
    }

    /// Advances the load. Returns whether the scene is ready; a fatal error leaves the
    /// loader failed and is returned once.
    pub fn update(&mut self, ctx: &mut RenderContext, fetcher: &dyn AssetFetcher) -> Result<bool, LoadError> {
        let state = std::mem::replace(&mut self.state, LoadState::Failed);
        match self.advance(ctx, fetcher, state) {
            Ok(state) => {
                self.state = state;
                Ok(self.is_ready())
            }
            Err(error) => {
                log::error!("scene load failed: {error}");
                Err(error)
            }
        }
    }

    fn advance(&mut self, ctx: &mut RenderContext, fetcher: &dyn AssetFetcher, state: LoadState) -> Result<LoadState, LoadError> {
        Ok(match state {
            LoadState::FetchingDocument { url, mut pending } => match pending.take() {
                None => LoadState::FetchingDocument { url, pending },
                Some(bytes) => {
                    let bytes = bytes?;
                    let (document, embedded) = if glb::is_glb(&bytes) {
                        let container = glb::parse(&bytes)?;
                        (Document::parse(container.json)?, container.bin.map(<[u8]>::to_vec))
                    } else {
                        (Document::parse(&bytes)?, None)
                    };
                    let mut embedded = embedded;
                    let mut requests = Vec::with_capacity(document.buffers().len());
                    for (index, buffer) in document.buffers().iter().enumerate() {
                        let request = match (&buffer.uri, index) {
                            (Some(uri), _) => fetcher.fetch_binary(&resolve_url(&url, uri)),
                            (None, 0) => match embedded.take() {
                                Some(bin) => Pending::ready(bin),
                                None => return Err(LoadError::Glb("buffer 0 has no uri and no BIN chunk")),
                            },
                            (None, _) => return Err(LoadError::DanglingReference { what: "buffer data", index }),
                        };
                        requests.push(request);
                    }
                    log::debug!("{url}: fetching {} buffers", requests.len());
                    let state = LoadState::FetchingBuffers { url, document, join: Join::new(requests) };
                    return self.advance(ctx, fetcher, state);
                }
            },
            LoadState::FetchingBuffers { url, document, mut join } => {
                if !join.poll()? {
                    return Ok(LoadState::FetchingBuffers { url, document, join });
                }
                let scene = LoadedScene::build(ctx, fetcher, &url, document, join.into_results())?;
                log::info!(
                    "scene {url} ready: {} drawcalls, {} animations",
                    scene.geometry.drawcall_count(),
                    scene.clips.len()
                );
                LoadState::Ready(Box::new(scene))
            }
            LoadState::Ready(mut scene) => {
                scene.poll_images(ctx);
                LoadState::Ready(scene)
            }
            state @ (LoadState::Idle | LoadState::Failed) => state,
        })
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.state, LoadState::Ready(_))
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.state, LoadState::Failed)
    }

    pub fn bounds(&self) -> Option<Bounds> {
        match &self.state {
            LoadState::Ready(scene) if !scene.geometry.bounds.is_empty() => Some(scene.geometry.bounds),
            _ => None,
        }
    }

    pub fn geometry(&self) -> Option<&Geometry> {
        match &self.state {
            LoadState::Ready(scene) => Some(&scene.geometry),
            _ => None,
        }
    }

    pub fn clips(&self) -> &[Clip] {
        match &self.state {
            LoadState::Ready(scene) => &scene.clips,
            _ => &[],
        }
    }

    /// Baked texture of `skin` for `clip`.
    pub fn baked_skin(&self, clip: usize, skin: usize) -> Option<&BakedSkin> {
        match &self.state {
            LoadState::Ready(scene) => scene.baked.get(clip).and_then(|skins| skins.get(skin)),
            _ => None,
        }
    }

    pub fn image(&self, index: usize) -> Option<&Texture> {
        match &self.state {
            LoadState::Ready(scene) => scene.images.get(index).and_then(Option::as_ref),
            _ => None,
        }
    }

    pub fn pending_images(&self) -> usize {
        match &self.state {
            LoadState::Ready(scene) => scene.image_fetches.len(),
            _ => 0,
        }
    }

    pub fn set_root_transform(&mut self, transform: Mat4) {
        self.root_transform = transform;
    }

    /// Plays `clip` at `time` seconds (wrapped to the clip duration when drawing).
    pub fn set_animation(&mut self, time: f32, clip: usize) -> Result<(), LoadError> {
        if let LoadState::Ready(scene) = &self.state {
            if clip >= scene.clips.len() {
                return Err(LoadError::DanglingReference { what: "animation", index: clip });
            }
        }
        self.animation = Some((clip, time));
        Ok(())
    }

    pub fn stop_animation(&mut self) {
        self.animation = None;
    }

    /// Appends one draw per primitive of every mesh node, with `uModel` and, for skinned
    /// nodes, the baked animation texture and `uAnimInfo = (texture width, row position)`.
    /// Returns false while the scene is not ready.
    pub fn collect_draws<'a>(&'a self, out: &mut Vec<DrawRequest<'a>>) -> bool {
        let LoadState::Ready(scene) = &self.state else {
            return false;
        };
        let playing = self.animation.and_then(|(clip_index, time)| {
            let clip = scene.clips.get(clip_index)?;
            let time = if clip.duration > 0.0 { time.rem_euclid(clip.duration) } else { 0.0 };
            Some((clip_index, clip, time))
        });

        scene.graph.traverse(
            self.root_transform,
            |id, node| playing.and_then(|(_, clip, time)| clip.animated_local(id, node, time)),
            |id, global| {
                let node = scene.graph.node(id);
                let Some(mesh) = node.mesh.and_then(|mesh| scene.geometry.meshes.get(mesh)) else {
                    return;
                };
                let baked = node.skin.map(|skin| {
                    playing.and_then(|(clip, _, time)| scene.baked[clip].get(skin).map(|baked| (baked, time)))
                });
                for primitive in &mesh.primitives {
                    let mut request = DrawRequest::new(&primitive.drawcall).with("uModel", *global);
                    match baked {
                        Some(Some((baked, time))) => {
                            request = request
                                .with("uAnimTex", baked.texture())
                                .with("uAnimInfo", Vec2::new(baked.width() as f32, baked.row_position(time)));
                        }
                        Some(None) => request = request.with("uAnimInfo", Vec2::ZERO),
                        None => {}
                    }
                    out.push(request);
                }
            },
        );
        true
    }

    pub fn destroy(self, ctx: &mut RenderContext) {
        if let LoadState::Ready(scene) = self.state {
            scene.destroy(ctx);
        }
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use glam::Vec3;

    use super::*;
    use crate::{
        assets::MemoryFetcher,
        render_context::{
            headless::{HeadlessApi, HeadlessProbe},
            Capabilities, ParamValue,
        },
        scene::fixtures::{skinned_bin, triangle_bin, SKINNED_JSON, TRIANGLE_JSON},
    };

    fn context() -> (RenderContext, HeadlessProbe) {
        let (api, probe) = HeadlessApi::new(Capabilities::FULL);
        (RenderContext::new(Box::new(api)), probe)
    }

    #[test]
    fn not_ready_until_buffers_arrive() {
        let (mut ctx, _probe) = context();
        let fetcher = MemoryFetcher::deferred();
        fetcher.insert("scenes/triangle.gltf", TRIANGLE_JSON).insert("scenes/triangle.bin", triangle_bin());

        let mut loader = SceneLoader::new();
        loader.load(&fetcher, "scenes/triangle.gltf");
        assert!(!loader.update(&mut ctx, &fetcher).unwrap());
        assert!(!loader.collect_draws(&mut Vec::new()));

        fetcher.release("scenes/triangle.gltf");
        assert!(!loader.update(&mut ctx, &fetcher).unwrap());
        assert_eq!(fetcher.held_count(), 1);

        fetcher.release_all();
        assert!(loader.update(&mut ctx, &fetcher).unwrap());
        let mut draws = Vec::new();
        assert!(loader.collect_draws(&mut draws));
        assert_eq!(draws.len(), 1);
        assert_eq!(draws[0].drawcall.vertex_count(), 3);
    }

    #[test]
    fn glb_container_supplies_buffer_zero() {
        let (mut ctx, _probe) = context();
        let json = TRIANGLE_JSON.replace(r#", "uri": "triangle.bin""#, "");
        let fetcher = MemoryFetcher::new();
        fetcher.insert("triangle.glb", glb::build(&json, &triangle_bin()));

        let mut loader = SceneLoader::new();
        loader.load(&fetcher, "triangle.glb");
        assert!(loader.update(&mut ctx, &fetcher).unwrap());
        let bounds = loader.bounds().unwrap();
        assert_eq!(bounds.max, Vec3::new(1.0, 2.0, 0.5));
    }

    #[test]
    fn fatal_errors_leave_the_loader_failed() {
        let (mut ctx, probe) = context();
        let fetcher = MemoryFetcher::new();
        fetcher.insert("broken.gltf", r#"{ "buffers": [] }"#);

        let mut loader = SceneLoader::new();
        loader.load(&fetcher, "broken.gltf");
        assert!(matches!(loader.update(&mut ctx, &fetcher), Err(LoadError::MissingArray("meshes"))));
        assert!(loader.is_failed());
        assert!(!loader.update(&mut ctx, &fetcher).unwrap());
        assert_eq!(probe.live_buffers(), 0);
    }

    #[test]
    fn skinned_draws_carry_animation_parameters() {
        let (mut ctx, _probe) = context();
        let fetcher = MemoryFetcher::new();
        fetcher.insert("skinned.gltf", SKINNED_JSON).insert("skinned.bin", skinned_bin());

        let mut loader = SceneLoader::new();
        loader.load(&fetcher, "skinned.gltf");
        assert!(loader.update(&mut ctx, &fetcher).unwrap());
        assert!(loader.set_animation(0.0, 3).is_err());

        let mut draws = Vec::new();
        loader.collect_draws(&mut draws);
        assert_eq!(draws[0].parameters.get("uAnimInfo"), Some(&ParamValue::Vec2(Vec2::ZERO)));
        drop(draws);

        loader.set_animation(3.0, 0).unwrap();
        let mut draws = Vec::new();
        loader.collect_draws(&mut draws);
        let baked = loader.baked_skin(0, 0).unwrap();
        let Some(ParamValue::Vec2(info)) = draws[0].parameters.get("uAnimInfo") else {
            panic!("missing uAnimInfo");
        };
        assert_relative_eq!(info.x, 6.0);
        assert_relative_eq!(info.y, baked.row_position(1.0));
        assert_eq!(draws[0].parameters.get("uAnimTex"), Some(&ParamValue::Texture(baked.texture().id())));
    }

    #[test]
    fn failed_images_leave_slots_empty() {
        let (mut ctx, probe) = context();
        let json = TRIANGLE_JSON.replace(r#""attributes": { "POSITION": 0 } }"#, r#""attributes": { "POSITION": 0 }, "material": 0 }"#).replace(
            r#""nodes": [{ "mesh": 0 }],"#,
            r#""nodes": [{ "mesh": 0 }],
            "materials": [{ "pbrMetallicRoughness": { "baseColorTexture": { "index": 0 } } }],
            "textures": [{ "source": 0 }, { "source": 1 }],
            "images": [{ "uri": "missing.png" }, { "uri": "present.png" }],"#,
        );
        let fetcher = MemoryFetcher::new();
        fetcher
            .insert("triangle.gltf", json)
            .insert("triangle.bin", triangle_bin())
            .insert_image("present.png", DecodedImage { width: 1, height: 1, pixels: vec![9; 4] });

        let mut loader = SceneLoader::new();
        loader.load(&fetcher, "triangle.gltf");
        assert!(loader.update(&mut ctx, &fetcher).unwrap());
        assert!(loader.update(&mut ctx, &fetcher).unwrap());
        assert!(loader.image(0).is_none());
        assert_eq!(loader.image(1).map(Texture::format), Some(Some(PixelFormat::Rgba8)));
        assert_eq!(loader.pending_images(), 0);

        let drawcall = &loader.geometry().unwrap().meshes[0].primitives[0].drawcall;
        assert!(!drawcall.flags().contains_key("USE_BASECOLOR_TEX"));

        loader.destroy(&mut ctx);
        assert_eq!(probe.live_textures(), 0);
        assert_eq!(probe.live_buffers(), 0);
    }
}
