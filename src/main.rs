#[rocket::launch]
fn rocket() -> _ {
    rbac_api::init_logger();
    log::info!("starting RBAC API server");
    rbac_api::rocket()
}
