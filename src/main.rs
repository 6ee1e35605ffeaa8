#[macro_use]
extern crate rocket;

#[launch]
fn rocket() -> _ {
    outreach_engine::rocket()
}
