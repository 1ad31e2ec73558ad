//! Print the MyApp CustomResourceDefinition as YAML.

use kube::CustomResourceExt;

use myapp_operator::MyApp;

fn main() -> anyhow::Result<()> {
    print!("{}", serde_yaml::to_string(&MyApp::crd())?);
    Ok(())
}
