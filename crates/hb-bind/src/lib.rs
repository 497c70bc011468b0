//! Service binding credentials for the helm broker
//!
//! Two steps turn an installed release into credentials: the plan's bind
//! template is rendered against the release ([`renderer`]), then the
//! rendered YAML is resolved into a flat credential map, reading any
//! referenced ConfigMaps, Secrets or Services ([`resolver`], [`source`]).

pub mod filters;
pub mod jsonpath;
pub mod renderer;
pub mod resolver;
pub mod source;

pub use renderer::{BindTemplateRenderer, RenderedBindYaml, Renderer};
pub use resolver::{BindTemplateResolver, ResolveOutput, Resolver};
pub use source::{CredentialSource, KubeCredentialSource};

#[cfg(any(test, feature = "mock"))]
pub use renderer::MockBindTemplateRenderer;
#[cfg(any(test, feature = "mock"))]
pub use resolver::MockBindTemplateResolver;
#[cfg(any(test, feature = "mock"))]
pub use source::MockCredentialSource;
