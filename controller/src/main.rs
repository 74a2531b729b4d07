use std::{convert::TryFrom, env};

use controller::{config::DrainSettings, telemetry::configure_routes, DrainController};
use models::{node::K8SDrainClient, telemetry};

use actix_web::{web::Data, App, HttpServer};
use opentelemetry_sdk::metrics::SdkMeterProvider;
use snafu::ResultExt;
use tracing::{event, Level};

/// The module-wide result type.
type Result<T> = std::result::Result<T, controller_error::Error>;

#[actix_web::main]
async fn main() -> Result<()> {
    telemetry::init_telemetry_from_env().context(controller_error::TelemetryInitSnafu)?;

    let settings = DrainSettings::from_environment().context(controller_error::SettingsSnafu)?;
    event!(Level::INFO, ?settings, "Starting drain controller.");

    // Prefer a local kubeconfig, falling back to the in-cluster service account.
    let k8s_config = kube::Config::infer()
        .await
        .context(controller_error::ConfigCreateSnafu)?;
    let k8s_client =
        kube::client::Client::try_from(k8s_config).context(controller_error::ClientCreateSnafu)?;

    // The meter provider has to be installed before the DrainController is created
    // in order for its instruments to be exported.
    let registry = prometheus::Registry::new();
    let exporter = opentelemetry_prometheus::exporter()
        .with_registry(registry.clone())
        .build()
        .context(controller_error::PrometheusSnafu)?;
    let provider = SdkMeterProvider::builder().with_reader(exporter).build();
    opentelemetry::global::set_meter_provider(provider);

    let drain_client = K8SDrainClient::new(k8s_client);
    let controller = DrainController::new(drain_client, &settings);
    let controller_runner = controller.run();

    // Match the IP family of the cluster if it can be determined.
    let bindaddress = match env::var("KUBERNETES_SERVICE_HOST") {
        // IPv6 format
        Ok(k8s_service_addr) if k8s_service_addr.contains(':') => "[::]",
        // IPv4 format
        _ => "0.0.0.0",
    };

    // Setup Http server for health checks and prometheus metrics
    let http_server = HttpServer::new(move || {
        App::new()
            .app_data(Data::new(registry.clone()))
            .configure(configure_routes)
    })
    .bind(format!("{}:{}", bindaddress, settings.http_port))
    .context(controller_error::HttpServerSnafu)?
    .run();

    tokio::select! {
        controller = controller_runner => {
            event!(Level::ERROR, "controller exited");
            controller.context(controller_error::ControllerSnafu)?
        },
        server = http_server => {
            event!(Level::ERROR, "http server exited");
            server.context(controller_error::HttpServerSnafu)?
        }
    };
    Ok(())
}

pub mod controller_error {
    use controller::config::settings_error;
    use models::telemetry;
    use snafu::Snafu;

    #[derive(Debug, Snafu)]
    #[snafu(visibility(pub))]
    pub enum Error {
        #[snafu(display("Unable to create Kubernetes client config: '{}'", source))]
        ConfigCreate {
            source: kube::config::InferConfigError,
        },

        #[snafu(display("Unable to create Kubernetes client: '{}'", source))]
        ClientCreate { source: kube::Error },

        #[snafu(display("Error running drain controller: '{}'", source))]
        Controller { source: controller::Error },

        #[snafu(display("Error running HTTP server: '{}'", source))]
        HttpServer { source: std::io::Error },

        #[snafu(display("Failed to set up prometheus exporter: '{}'", source))]
        Prometheus {
            source: opentelemetry::metrics::MetricsError,
        },

        #[snafu(display("Invalid controller settings: '{}'", source))]
        Settings { source: settings_error::Error },

        #[snafu(display("Error configuring telemetry: '{}'", source))]
        TelemetryInit {
            source: telemetry::TelemetryConfigError,
        },
    }
}
